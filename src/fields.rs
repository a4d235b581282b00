//! Domain fields of DIR and FI checksheets.
//!
//! The workflow engine treats these as opaque except during
//! `edit-during-revision`, where a [`FieldPatch`] is merged into the stored
//! fields and checked by a [`FieldValidator`] before it is written.
use crate::error::WorkflowError;
use crate::types::ChecksheetKind;
use serde::{Deserialize, Serialize};

/// Dimensional Inspection Report fields
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct DirFields {
    #[n(0)]
    pub model: String,
    #[n(1)]
    pub part_number: String,
    #[n(2)]
    pub customer: String,
    #[n(3)]
    pub shift: String,
    #[n(4)]
    pub section: String,
    #[n(5)]
    pub lot_number: String,
    #[n(6)]
    pub remarks: Option<String>,
}

/// Final Inspection fields
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct FiFields {
    #[n(0)]
    pub model: String,
    #[n(1)]
    pub part_number: String,
    #[n(2)]
    pub customer: String,
    #[n(3)]
    pub material: String,
    #[n(4)]
    pub delivery_order: String,
    #[n(5)]
    pub checked_quantity: u32,
    #[n(6)]
    pub ng_quantity: u32,
    #[n(7)]
    pub remarks: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChecksheetFields {
    #[n(0)]
    Dir(#[n(0)] DirFields),
    #[n(1)]
    Fi(#[n(0)] FiFields),
}

impl ChecksheetFields {
    pub fn kind(&self) -> ChecksheetKind {
        match self {
            ChecksheetFields::Dir(_) => ChecksheetKind::Dir,
            ChecksheetFields::Fi(_) => ChecksheetKind::Fi,
        }
    }
    /// sha256 over the CBOR encoding, recorded with every approval event
    pub fn digest(&self) -> Result<String, WorkflowError> {
        let cbor = minicbor::to_vec(self)?;
        Ok(sha256::digest(&cbor))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DirPatch {
    pub model: Option<String>,
    pub part_number: Option<String>,
    pub customer: Option<String>,
    pub shift: Option<String>,
    pub section: Option<String>,
    pub lot_number: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FiPatch {
    pub model: Option<String>,
    pub part_number: Option<String>,
    pub customer: Option<String>,
    pub material: Option<String>,
    pub delivery_order: Option<String>,
    pub checked_quantity: Option<u32>,
    pub ng_quantity: Option<u32>,
    pub remarks: Option<String>,
}

/// Partial update applied by an operator while a checksheet is in `revision`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPatch {
    Dir(DirPatch),
    Fi(FiPatch),
}

fn set<T>(target: &mut T, value: &Option<T>)
where
    T: Clone,
{
    if let Some(value) = value {
        *target = value.clone();
    }
}

fn set_opt<T>(target: &mut Option<T>, value: &Option<T>)
where
    T: Clone,
{
    if value.is_some() {
        *target = value.clone();
    }
}

impl FieldPatch {
    pub fn kind(&self) -> ChecksheetKind {
        match self {
            FieldPatch::Dir(_) => ChecksheetKind::Dir,
            FieldPatch::Fi(_) => ChecksheetKind::Fi,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldPatch::Dir(p) => *p == DirPatch::default(),
            FieldPatch::Fi(p) => *p == FiPatch::default(),
        }
    }

    /// Parse a JSON object into the patch type for `kind`; unknown keys are rejected
    pub fn from_json(
        kind: ChecksheetKind,
        value: serde_json::Value,
    ) -> Result<Self, WorkflowError> {
        let patch = match kind {
            ChecksheetKind::Dir => serde_json::from_value(value).map(FieldPatch::Dir),
            ChecksheetKind::Fi => serde_json::from_value(value).map(FieldPatch::Fi),
        };
        patch.map_err(|e| WorkflowError::Validation(format!("malformed {kind} update: {e}")))
    }

    pub fn from_slice(kind: ChecksheetKind, body: &[u8]) -> Result<Self, WorkflowError> {
        let value = serde_json::from_slice(body)
            .map_err(|e| WorkflowError::Validation(format!("malformed body: {e}")))?;
        Self::from_json(kind, value)
    }

    /// Returns the merged fields; `current` is left untouched
    pub fn apply(&self, current: &ChecksheetFields) -> Result<ChecksheetFields, WorkflowError> {
        match (self, current) {
            (FieldPatch::Dir(p), ChecksheetFields::Dir(cur)) => {
                let mut next = cur.clone();
                set(&mut next.model, &p.model);
                set(&mut next.part_number, &p.part_number);
                set(&mut next.customer, &p.customer);
                set(&mut next.shift, &p.shift);
                set(&mut next.section, &p.section);
                set(&mut next.lot_number, &p.lot_number);
                set_opt(&mut next.remarks, &p.remarks);
                Ok(ChecksheetFields::Dir(next))
            }
            (FieldPatch::Fi(p), ChecksheetFields::Fi(cur)) => {
                let mut next = cur.clone();
                set(&mut next.model, &p.model);
                set(&mut next.part_number, &p.part_number);
                set(&mut next.customer, &p.customer);
                set(&mut next.material, &p.material);
                set(&mut next.delivery_order, &p.delivery_order);
                set(&mut next.checked_quantity, &p.checked_quantity);
                set(&mut next.ng_quantity, &p.ng_quantity);
                set_opt(&mut next.remarks, &p.remarks);
                Ok(ChecksheetFields::Fi(next))
            }
            _ => Err(WorkflowError::Validation(format!(
                "{} update cannot be applied to a {} checksheet",
                self.kind(),
                current.kind()
            ))),
        }
    }
}

/// Domain schema check run on the merged fields before an edit is written.
///
/// Master-data lookups (does this model exist, is this customer active) belong
/// to the reference-table services and plug in here.
pub trait FieldValidator: Send + Sync {
    fn validate(&self, fields: &ChecksheetFields) -> Result<(), WorkflowError>;
}

/// Structural rules only: required text is non-blank, NG never exceeds checked quantity
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

fn required(name: &str, value: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        return Err(WorkflowError::Validation(format!("{name} must not be blank")));
    }
    Ok(())
}

impl FieldValidator for SchemaValidator {
    fn validate(&self, fields: &ChecksheetFields) -> Result<(), WorkflowError> {
        match fields {
            ChecksheetFields::Dir(f) => {
                required("model", &f.model)?;
                required("partNumber", &f.part_number)?;
                required("customer", &f.customer)?;
                required("shift", &f.shift)?;
                required("section", &f.section)?;
                required("lotNumber", &f.lot_number)
            }
            ChecksheetFields::Fi(f) => {
                required("model", &f.model)?;
                required("partNumber", &f.part_number)?;
                required("customer", &f.customer)?;
                required("material", &f.material)?;
                required("deliveryOrder", &f.delivery_order)?;
                if f.ng_quantity > f.checked_quantity {
                    return Err(WorkflowError::Validation(format!(
                        "ngQuantity ({}) exceeds checkedQuantity ({})",
                        f.ng_quantity, f.checked_quantity
                    )));
                }
                Ok(())
            }
        }
    }
}
