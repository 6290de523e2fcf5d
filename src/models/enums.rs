use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Role {
    Doctor => "doctor",
    Patient => "patient",
});

str_enum!(AppointmentStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Rescheduled => "rescheduled",
});

impl Role {
    /// Parse a stored role, accepting the Spanish spellings older records carry.
    pub fn parse_stored(s: &str) -> Option<Self> {
        match s {
            "doctor" | "medico" => Some(Self::Doctor),
            "patient" | "paciente" => Some(Self::Patient),
            _ => None,
        }
    }
}
