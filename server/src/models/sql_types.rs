//! Column types shared by the row models.
//!
//! Enumerations are stored as plain `TEXT` so the schema stays readable from
//! `psql`; `text_enum!` generates the serde names, the string conversions and
//! the sqlx codec for each of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};

/// A string that names no variant of the target enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($label:literal) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::sql_types::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::models::sql_types::UnknownVariant {
                        kind: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <&str as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
                Ok(text.parse()?)
            }
        }
    };
}

text_enum! {
    pub enum UserRole ("role") {
        Physician => "physician",
        Nurse => "nurse",
        Administrator => "administrator",
        MedicalAssistant => "medical_assistant",
    }
}

impl UserRole {
    /// Roles allowed to create or modify clinical data.
    pub fn is_clinical(&self) -> bool {
        matches!(self, UserRole::Physician | UserRole::Nurse)
    }
}

text_enum! {
    pub enum UserStatus ("user status") {
        Active => "active",
        Disabled => "disabled",
    }
}

text_enum! {
    pub enum Gender ("gender") {
        Male => "male",
        Female => "female",
        Other => "other",
        Unknown => "unknown",
        PreferNotToSay => "prefer_not_to_say",
    }
}

text_enum! {
    pub enum BloodType ("blood type") {
        APositive => "A+",
        ANegative => "A-",
        BPositive => "B+",
        BNegative => "B-",
        AbPositive => "AB+",
        AbNegative => "AB-",
        OPositive => "O+",
        ONegative => "O-",
    }
}

text_enum! {
    pub enum PatientStatus ("patient status") {
        Active => "active",
        Inactive => "inactive",
    }
}

text_enum! {
    pub enum VisitType ("visit type") {
        Routine => "routine",
        InitialConsultation => "initial_consultation",
        FollowUp => "follow_up",
        UrgentCare => "urgent_care",
        RoutineCheckup => "routine_checkup",
        Emergency => "emergency",
        Telehealth => "telehealth",
    }
}

text_enum! {
    pub enum EncounterStatus ("encounter status") {
        Completed => "completed",
        Pending => "pending",
        Cancelled => "cancelled",
    }
}

text_enum! {
    pub enum DiagnosisType ("diagnosis type") {
        Primary => "primary",
        Secondary => "secondary",
    }
}

text_enum! {
    pub enum DiagnosisStatus ("diagnosis status") {
        Active => "active",
        Resolved => "resolved",
    }
}

text_enum! {
    pub enum Route ("route") {
        Oral => "oral",
        Topical => "topical",
        Injection => "injection",
        Intravenous => "intravenous",
        Inhalation => "inhalation",
        Subcutaneous => "subcutaneous",
        Intramuscular => "intramuscular",
    }
}

text_enum! {
    pub enum PrescriptionStatus ("prescription status") {
        Active => "active",
        Completed => "completed",
        Discontinued => "discontinued",
        Expired => "expired",
        Pending => "pending",
    }
}

/// Structured JSON persisted as serialized text and re-parsed on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredJson(pub Value);

impl Type<Postgres> for StoredJson {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for StoredJson {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> IsNull {
        <String as Encode<'q, Postgres>>::encode(self.0.to_string(), buf)
    }
}

impl<'r> Decode<'r, Postgres> for StoredJson {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let text = <&str as Decode<'r, Postgres>>::decode(value)?;
        Ok(StoredJson(serde_json::from_str(text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_text_matches_serde_name() {
        for role in UserRole::ALL {
            let json = serde_json::to_value(role).unwrap();
            assert_eq!(json, Value::String(role.as_str().to_string()));
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), *role);
        }
        assert_eq!(
            serde_json::to_value(BloodType::AbNegative).unwrap(),
            Value::String("AB-".to_string())
        );
    }

    #[test]
    fn test_unknown_variant_names_the_kind() {
        let err = "surgeon".parse::<UserRole>().unwrap_err();
        assert_eq!(err.kind, "role");
        assert_eq!(err.to_string(), "'surgeon' is not a valid role");
    }

    #[test]
    fn test_only_physician_and_nurse_are_clinical() {
        let clinical: Vec<_> = UserRole::ALL.iter().filter(|r| r.is_clinical()).collect();
        assert_eq!(clinical, vec![&UserRole::Physician, &UserRole::Nurse]);
    }

    #[test]
    fn test_visit_type_values_include_routine_default() {
        assert!(VisitType::VALUES.contains(&"routine"));
        assert_eq!(VisitType::VALUES.len(), VisitType::ALL.len());
    }
}
