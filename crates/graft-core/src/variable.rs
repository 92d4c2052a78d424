// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Variables: typed, tagged, mutable boxes around one leaf value.
//!
//! Type tags serialize as their lineage of names, nearest first. Reading one
//! back resolves the name through a process-wide registry seeded with the
//! built-in tags; custom tags must be registered with
//! [`register_variable_type`] before a state or descriptor that uses them is
//! deserialized.
use std::sync::{OnceLock, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GraftError, Result};
use crate::value::Value;

/// Static type tag of a [`Variable`].
///
/// Tags form a single-inheritance hierarchy through `parent`, which is what
/// [`crate::Filter::OfType`] uses for its instance-of test. Declare new tags
/// as statics:
///
/// ```
/// use graft_core::{VarType, PARAM};
///
/// static LORA_PARAM: VarType = VarType::subtype("LoRAParam", &PARAM);
/// assert!(LORA_PARAM.is_subtype_of(&PARAM));
/// assert!(!PARAM.is_subtype_of(&LORA_PARAM));
/// ```
///
/// Two tags are equal when their names and their whole parent chains are
/// equal, so independently declared statics with the same lineage compare
/// equal.
#[derive(Clone, Copy, Debug)]
pub struct VarType {
    name: &'static str,
    parent: Option<&'static VarType>,
}

impl VarType {
    /// A root tag with no parent.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// A tag that is an instance of `parent` (and of all of its ancestors).
    #[must_use]
    pub const fn subtype(name: &'static str, parent: &'static Self) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    /// The tag's own name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The direct parent tag.
    #[must_use]
    pub const fn parent(&self) -> Option<&'static Self> {
        self.parent
    }

    /// Iterates `self` followed by every ancestor, nearest first.
    pub fn lineage(&self) -> impl Iterator<Item = &Self> + '_ {
        core::iter::successors(Some(self), |t| t.parent)
    }

    /// Number of ancestors (`0` for a root tag).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lineage().count() - 1
    }

    /// Returns `true` if `self` is `other` or descends from it.
    #[must_use]
    pub fn is_subtype_of(&self, other: &Self) -> bool {
        let skip = match self.depth().checked_sub(other.depth()) {
            Some(skip) => skip,
            None => return false,
        };
        self.lineage().nth(skip).is_some_and(|t| t == other)
    }
}

impl PartialEq for VarType {
    fn eq(&self, other: &Self) -> bool {
        self.lineage()
            .map(VarType::name)
            .eq(other.lineage().map(VarType::name))
    }
}

impl Eq for VarType {}

impl core::hash::Hash for VarType {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        for t in self.lineage() {
            t.name.hash(state);
        }
    }
}

impl core::fmt::Display for VarType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name)
    }
}

impl Serialize for VarType {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.lineage().map(Self::name))
    }
}

impl<'de> Deserialize<'de> for VarType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        let name = names
            .first()
            .ok_or_else(|| D::Error::custom("empty variable type lineage"))?;
        let ty = variable_type_from_name(name)
            .ok_or_else(|| D::Error::custom(format!("unregistered variable type {name}")))?;
        if !ty.lineage().map(Self::name).eq(names.iter().map(String::as_str)) {
            return Err(D::Error::custom(format!(
                "variable type {name} is registered with a different lineage"
            )));
        }
        Ok(*ty)
    }
}

/// Trainable parameters.
pub static PARAM: VarType = VarType::new("Param");
/// Running statistics (e.g. batch-norm mean and variance).
pub static BATCH_STAT: VarType = VarType::new("BatchStat");
/// Autoregressive caches.
pub static CACHE: VarType = VarType::new("Cache");
/// Values sown during a forward pass.
pub static INTERMEDIATE: VarType = VarType::new("Intermediate");
/// Zero-valued probes used to read gradients of intermediates.
pub static PERTURBATION: VarType = VarType::new("Perturbation");
/// Parent tag of every RNG stream variable.
pub static RNG_STATE: VarType = VarType::new("RngState");
/// Root seed of an RNG stream.
pub static RNG_KEY: VarType = VarType::subtype("RngKey", &RNG_STATE);
/// Counter of an RNG stream.
pub static RNG_COUNT: VarType = VarType::subtype("RngCount", &RNG_STATE);

static BUILTIN_TYPES: [&VarType; 8] = [
    &PARAM,
    &BATCH_STAT,
    &CACHE,
    &INTERMEDIATE,
    &PERTURBATION,
    &RNG_STATE,
    &RNG_KEY,
    &RNG_COUNT,
];

static TYPE_REGISTRY: OnceLock<RwLock<FxHashMap<&'static str, &'static VarType>>> =
    OnceLock::new();

fn type_registry() -> &'static RwLock<FxHashMap<&'static str, &'static VarType>> {
    TYPE_REGISTRY.get_or_init(|| {
        let mut types = FxHashMap::default();
        for ty in BUILTIN_TYPES {
            types.insert(ty.name, ty);
        }
        RwLock::new(types)
    })
}

/// Makes `ty` and its ancestors resolvable by name during deserialization.
///
/// Registering the same lineage again is a no-op.
///
/// # Errors
/// [`GraftError::VariableTypeConflict`] if a name in the lineage is already
/// registered with a different lineage; nothing is registered in that case.
pub fn register_variable_type(ty: &'static VarType) -> Result<()> {
    let mut types = type_registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    let lineage: Vec<&'static VarType> = ty.lineage().collect();
    for tag in &lineage {
        if types.get(tag.name).is_some_and(|known| known != tag) {
            return Err(GraftError::VariableTypeConflict(tag.name));
        }
    }
    for tag in lineage {
        types.entry(tag.name).or_insert(tag);
    }
    Ok(())
}

/// Registered tag named `name`, if any.
#[must_use]
pub fn variable_type_from_name(name: &str) -> Option<&'static VarType> {
    type_registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .copied()
}

/// Descriptor-side metadata of a variable: everything except its value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableMeta {
    /// Type tag.
    pub ty: VarType,
    /// Optional stream/category tag.
    pub tag: Option<String>,
    /// Whether the value may be overwritten.
    pub mutable: bool,
}

impl VariableMeta {
    pub(crate) fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.ty.depth() as u64 + 1).to_le_bytes());
        for t in self.ty.lineage() {
            hasher.update(&(t.name.len() as u64).to_le_bytes());
            hasher.update(t.name.as_bytes());
        }
        match &self.tag {
            None => {
                hasher.update(&[0]);
            }
            Some(tag) => {
                hasher.update(&[1]);
                hasher.update(&(tag.len() as u64).to_le_bytes());
                hasher.update(tag.as_bytes());
            }
        }
        hasher.update(&[u8::from(self.mutable)]);
    }
}

/// Named, typed box holding one leaf value.
///
/// Identity lives in the arena ([`crate::VarRef`]); this struct is the
/// content. Snapshots of it travel inside [`crate::State`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    value: Value,
    meta: VariableMeta,
}

impl Variable {
    /// Creates a mutable, untagged variable of type `ty`.
    pub fn new(ty: VarType, value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            meta: VariableMeta {
                ty,
                tag: None,
                mutable: true,
            },
        }
    }

    /// Shorthand for a [`PARAM`] variable.
    pub fn param(value: impl Into<Value>) -> Self {
        Self::new(PARAM, value)
    }

    /// Shorthand for a [`BATCH_STAT`] variable.
    pub fn batch_stat(value: impl Into<Value>) -> Self {
        Self::new(BATCH_STAT, value)
    }

    pub(crate) fn from_meta(meta: VariableMeta, value: Value) -> Self {
        Self { value, meta }
    }

    /// Sets the stream/category tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.meta.tag = Some(tag.into());
        self
    }

    /// Marks the variable read-only.
    #[must_use]
    pub fn frozen(mut self) -> Self {
        self.meta.mutable = false;
        self
    }

    /// Current value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Type tag.
    #[must_use]
    pub const fn ty(&self) -> VarType {
        self.meta.ty
    }

    /// Stream/category tag.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.meta.tag.as_deref()
    }

    /// Whether the value may be overwritten.
    #[must_use]
    pub const fn is_mutable(&self) -> bool {
        self.meta.mutable
    }

    /// Metadata without the value.
    #[must_use]
    pub const fn meta(&self) -> &VariableMeta {
        &self.meta
    }

    /// Consumes the variable, returning its value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns a copy carrying `value` and the same metadata.
    #[must_use]
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            value,
            meta: self.meta.clone(),
        }
    }

    /// Overwrites the value cell, ignoring the mutability flag.
    pub(crate) fn replace_value(&mut self, value: Value) {
        self.value = value;
    }
}
