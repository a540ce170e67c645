//! Name conversions for the small enums that travel in config, logs and
//! snapshots (`Channel`, `Priority`, `JobState`, ...).

/// Gives a unit-variant enum a fixed lowercase name.
///
/// Generates `as_str`, `Display` from that name, and a `FromStr` that
/// ignores ASCII case and rejects anything else with
/// `FastBreakError::InvalidInput`.
///
/// ```rust
/// use fastbreak_domain::impl_name_conversions;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum Receipt {
///     Queued,
///     Bounced,
/// }
///
/// impl_name_conversions!(Receipt {
///     Queued => "queued",
///     Bounced => "bounced",
/// });
///
/// assert_eq!(Receipt::Bounced.as_str(), "bounced");
/// assert_eq!("QUEUED".parse::<Receipt>(), Ok(Receipt::Queued));
/// ```
#[macro_export]
macro_rules! impl_name_conversions {
    ($enum_name:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $enum_name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::errors::FastBreakError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($name) {
                        return Ok(Self::$variant);
                    }
                )+
                Err($crate::errors::FastBreakError::InvalidInput(format!(
                    "unknown {} '{}'",
                    stringify!($enum_name),
                    s
                )))
            }
        }
    };
}
