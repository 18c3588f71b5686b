#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::{validate_optional_text, validate_text};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const IDENTITY_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Length of every facial encoding produced by the vision collaborator.
pub const FACE_ENCODING_DIM: usize = 128;

pub const IDENTITY_ID_LEN: usize = 8;
pub const DISPLAY_NAME_MAX_LEN: usize = 100;
pub const ALIAS_MAX_LEN: usize = 11;
pub const EMAIL_MAX_LEN: usize = 255;
pub const ENROLLMENT_NUMBER_MAX_LEN: usize = 255;
pub const ICON_PATH_MAX_LEN: usize = 255;
pub const PASSWORD_HASH_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for IdentityId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.len() != IDENTITY_ID_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "identity_id",
                reason: "must be exactly 8 chars",
            });
        }
        if !self.0.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ContractViolation::InvalidValue {
                field: "identity_id",
                reason: "must be ASCII alphanumeric",
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    Discente,
    Docente,
    Administrador,
}

impl PermissionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Discente => "discente",
            PermissionLevel::Docente => "docente",
            PermissionLevel::Administrador => "administrador",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ContractViolation> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discente" => Ok(PermissionLevel::Discente),
            "docente" => Ok(PermissionLevel::Docente),
            "administrador" => Ok(PermissionLevel::Administrador),
            _ => Err(ContractViolation::InvalidValue {
                field: "permission_level",
                reason: "must be discente, docente or administrador",
            }),
        }
    }

    pub fn requires_credential(self) -> bool {
        self == PermissionLevel::Administrador
    }
}

/// National id (`cpf`) in the fixed `NNN.NNN.NNN-NN` layout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NationalId(String);

impl NationalId {
    pub fn new(cpf: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(cpf.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for NationalId {
    fn validate(&self) -> Result<(), ContractViolation> {
        let bytes = self.0.as_bytes();
        let layout_ok = bytes.len() == 14
            && bytes.iter().enumerate().all(|(i, b)| match i {
                3 | 7 => *b == b'.',
                11 => *b == b'-',
                _ => b.is_ascii_digit(),
            });
        if !layout_ok {
            return Err(ContractViolation::InvalidValue {
                field: "national_id",
                reason: "must match NNN.NNN.NNN-NN",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(email.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for EmailAddress {
    fn validate(&self) -> Result<(), ContractViolation> {
        const FIELD: &str = "email";
        if self.0.len() > EMAIL_MAX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: FIELD,
                reason: "must be <= 255 chars",
            });
        }
        let Some((local, domain)) = self.0.split_once('@') else {
            return Err(ContractViolation::InvalidValue {
                field: FIELD,
                reason: "must contain '@'",
            });
        };
        let local_ok = !local.is_empty()
            && local
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'%' | b'+' | b'-'));
        if !local_ok {
            return Err(ContractViolation::InvalidValue {
                field: FIELD,
                reason: "local part has invalid characters",
            });
        }
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 {
            return Err(ContractViolation::InvalidValue {
                field: FIELD,
                reason: "domain must contain a '.'",
            });
        }
        for label in &labels {
            let label_ok = !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
            if !label_ok {
                return Err(ContractViolation::InvalidValue {
                    field: FIELD,
                    reason: "domain label is invalid",
                });
            }
        }
        let tld = labels[labels.len() - 1];
        if tld.len() < 2 || !tld.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ContractViolation::InvalidValue {
                field: FIELD,
                reason: "top-level domain must be >= 2 letters",
            });
        }
        Ok(())
    }
}

/// SHA-256 hex digest of a credential. Stored lowercase.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hex_digest: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(hex_digest.into().to_ascii_lowercase());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

impl Validate for PasswordHash {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.len() != PASSWORD_HASH_LEN || !self.0.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ContractViolation::InvalidValue {
                field: "password_hash",
                reason: "must be 64 hex chars",
            });
        }
        Ok(())
    }
}

/// Administrators always carry a credential; every other level never does.
pub fn check_credential_invariant(
    permission_level: PermissionLevel,
    credential: Option<&PasswordHash>,
) -> Result<(), ContractViolation> {
    match (permission_level.requires_credential(), credential) {
        (true, None) => Err(ContractViolation::InvalidValue {
            field: "identity.senha",
            reason: "administrador requires a credential",
        }),
        (false, Some(_)) => Err(ContractViolation::InvalidValue {
            field: "identity.senha",
            reason: "only administrador may carry a credential",
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceEncoding(Vec<f64>);

impl FaceEncoding {
    pub fn v1(values: Vec<f64>) -> Result<Self, ContractViolation> {
        let v = Self(values);
        v.validate()?;
        Ok(v)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Parses the `encodings` column: comma-separated decimals, blanks ignored.
    pub fn from_column_text(text: &str) -> Result<Self, ContractViolation> {
        let mut values = Vec::with_capacity(FACE_ENCODING_DIM);
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let v = part
                .parse::<f64>()
                .map_err(|_| ContractViolation::InvalidValue {
                    field: "identity.encodings",
                    reason: "must be comma-separated decimals",
                })?;
            values.push(v);
        }
        Self::v1(values)
    }

    pub fn to_column_text(&self) -> String {
        self.0
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Validate for FaceEncoding {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.len() != FACE_ENCODING_DIM {
            return Err(ContractViolation::InvalidValue {
                field: "face_encoding",
                reason: "must contain exactly 128 values",
            });
        }
        if self.0.iter().any(|v| !v.is_finite()) {
            return Err(ContractViolation::NotFinite {
                field: "face_encoding",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub schema_version: SchemaVersion,
    pub id: IdentityId,
    pub nome: String,
    pub alias: String,
    pub cpf: NationalId,
    pub email: EmailAddress,
    pub matricula: Option<String>,
    pub senha: Option<PasswordHash>,
    pub icon_path: Option<String>,
    pub permission_level: PermissionLevel,
    pub encoding: FaceEncoding,
}

impl IdentityRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        id: IdentityId,
        nome: String,
        alias: String,
        cpf: NationalId,
        email: EmailAddress,
        matricula: Option<String>,
        senha: Option<PasswordHash>,
        icon_path: Option<String>,
        permission_level: PermissionLevel,
        encoding: FaceEncoding,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: IDENTITY_CONTRACT_VERSION,
            id,
            nome,
            alias,
            cpf,
            email,
            matricula,
            senha,
            icon_path,
            permission_level,
            encoding,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for IdentityRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        validate_text("identity.nome", &self.nome, DISPLAY_NAME_MAX_LEN)?;
        validate_text("identity.alias", &self.alias, ALIAS_MAX_LEN)?;
        self.cpf.validate()?;
        self.email.validate()?;
        validate_optional_text(
            "identity.matricula",
            self.matricula.as_deref(),
            ENROLLMENT_NUMBER_MAX_LEN,
        )?;
        validate_optional_text(
            "identity.icon_path",
            self.icon_path.as_deref(),
            ICON_PATH_MAX_LEN,
        )?;
        if let Some(senha) = &self.senha {
            senha.validate()?;
        }
        check_credential_invariant(self.permission_level, self.senha.as_ref())?;
        self.encoding.validate()
    }
}
