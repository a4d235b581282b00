//! Core checksheet types: identities, roles, workflow status and the stored record
use crate::fields::ChecksheetFields;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid7::{Uuid, uuid7};

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChecksheetKind {
    #[n(0)]
    Dir,
    #[n(1)]
    Fi,
}

impl ChecksheetKind {
    /// Single byte used as the leading component of storage keys
    pub fn tag(self) -> u8 {
        match self {
            ChecksheetKind::Dir => 0,
            ChecksheetKind::Fi => 1,
        }
    }
    /// Collection segment of the HTTP routes, `dirs` or `fis`
    pub fn collection(self) -> &'static str {
        match self {
            ChecksheetKind::Dir => "dirs",
            ChecksheetKind::Fi => "fis",
        }
    }
    pub fn from_collection(segment: &str) -> Option<Self> {
        match segment {
            "dirs" => Some(ChecksheetKind::Dir),
            "fis" => Some(ChecksheetKind::Fi),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksheetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksheetKind::Dir => f.write_str("dir"),
            ChecksheetKind::Fi => f.write_str("fi"),
        }
    }
}

// uuid7::Uuid has no minicbor or serde impls, so every id is a newtype over it
macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid7())
            }
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from(bytes))
            }
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<Uuid>()
                    .map(Self)
                    .map_err(|_| format!("'{s}' is not a valid uuid"))
            }
        }

        impl<C> minicbor::Encode<C> for $name {
            fn encode<W: minicbor::encode::Write>(
                &self,
                e: &mut minicbor::Encoder<W>,
                _: &mut C,
            ) -> Result<(), minicbor::encode::Error<W::Error>> {
                e.bytes(self.0.as_bytes())?.ok()
            }
        }

        impl<'b, C> minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut minicbor::Decoder<'b>,
                _: &mut C,
            ) -> Result<Self, minicbor::decode::Error> {
                let bytes: [u8; 16] = d
                    .bytes()?
                    .try_into()
                    .map_err(|_| minicbor::decode::Error::message("uuid must be 16 bytes"))?;
                Ok(Self::from_bytes(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of a DIR or FI row
    ChecksheetId
);
uuid_newtype!(
    /// Identifier of an authenticated user, issued outside this crate
    UserId
);
uuid_newtype!(
    /// Identifier of a single ledger row
    RecordId
);

/// A checksheet reference: which table plus which row.
///
/// The ledgers are shared between DIR and FI, so every ledger row is keyed by
/// the pair rather than by the id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChecksheetKey {
    pub kind: ChecksheetKind,
    pub id: ChecksheetId,
}

impl ChecksheetKey {
    pub fn new(kind: ChecksheetKind, id: ChecksheetId) -> Self {
        Self { kind, id }
    }
    pub fn dir(id: ChecksheetId) -> Self {
        Self::new(ChecksheetKind::Dir, id)
    }
    pub fn fi(id: ChecksheetId) -> Self {
        Self::new(ChecksheetKind::Fi, id)
    }
    /// `kind tag ‖ id`, the common prefix of every storage key for this checksheet
    pub fn prefix(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        out[0] = self.kind.tag();
        out[1..].copy_from_slice(self.id.as_bytes());
        out
    }
}

impl fmt::Display for ChecksheetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Inspector,
    Supervisor,
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Inspector => f.write_str("inspector"),
            Role::Supervisor => f.write_str("supervisor"),
            Role::Operator => f.write_str("operator"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inspector" => Ok(Role::Inspector),
            "supervisor" => Ok(Role::Supervisor),
            "operator" => Ok(Role::Operator),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[n(0)]
    Pending,
    #[n(1)]
    Revision,
    #[n(2)]
    Checked,
    #[n(3)]
    Approved,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        self == Status::Approved
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => f.write_str("pending"),
            Status::Revision => f.write_str("revision"),
            Status::Checked => f.write_str("checked"),
            Status::Approved => f.write_str("approved"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// The smallest timestamp strictly after `self`
    pub fn tick(&self) -> Self {
        Self(self.0 + chrono::Duration::nanoseconds(1))
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A DIR or FI record under workflow control.
///
/// The kind is carried by `fields`, so a checksheet can never disagree with
/// the table it is stored in.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checksheet {
    #[n(0)]
    pub id: ChecksheetId,
    #[n(1)]
    pub code: String, // human readable, e.g. DIR-2024-0001
    #[n(2)]
    pub owner_id: UserId,
    #[n(3)]
    pub fields: ChecksheetFields,
    #[n(4)]
    pub status: Status,
    #[n(5)]
    pub locked: bool, // set by submit and resubmit, cleared by request-revision
    #[n(6)]
    pub created_at: TimeStamp,
    #[n(7)]
    pub updated_at: TimeStamp,
    #[n(8)]
    pub deleted_at: Option<TimeStamp>,
}

impl Checksheet {
    /// A fresh checksheet in `pending`, as handed over by the creating inspector
    pub fn new(code: impl Into<String>, owner_id: UserId, fields: ChecksheetFields) -> Self {
        let now = TimeStamp::now();
        Self {
            id: ChecksheetId::new(),
            code: code.into(),
            owner_id,
            fields,
            status: Status::Pending,
            locked: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
    pub fn kind(&self) -> ChecksheetKind {
        self.fields.kind()
    }
    pub fn key(&self) -> ChecksheetKey {
        ChecksheetKey::new(self.kind(), self.id)
    }
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
