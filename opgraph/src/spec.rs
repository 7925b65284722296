//! Declarative description of a net: [`NetSpec`], [`OperatorSpec`] and the execution target
//! ([`DeviceOption`]) that can be attached to either of them.
//!
//! A spec is immutable once it is part of a [`NetSpec`]. The only transformation the engine
//! applies is the resolution of the net wide default device option, see
//! [`NetSpec::resolved_operators`].

use std::{collections::BTreeMap, fs, ops::Deref, path::Path, sync::Arc};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::registry::SIMPLE_NET_TYPE;

/// Placeholder name used in reports for operators with neither a name nor an output.
pub const NO_OUTPUT: &str = "NO_OUTPUT";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    #[display("cpu")]
    Cpu,
    #[display("cuda")]
    Cuda,
    #[display("hip")]
    Hip,
}

/// Execution target of an operator, e.g. which physical device it runs on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOption {
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub device_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

impl DeviceOption {
    pub fn cpu() -> Self {
        Self::default()
    }

    pub fn cuda(device_id: i32) -> Self {
        Self {
            device_type: DeviceType::Cuda,
            device_id,
            ..Default::default()
        }
    }
}

/// A named operator argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, derive_more::From)]
#[serde(untagged)]
pub enum Argument {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

/// Declarative description of a single operator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    #[serde(rename = "type")]
    pub op_type: String,
    /// Human readable name, may be empty.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_option: Option<DeviceOption>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Argument>,
}

impl OperatorSpec {
    pub fn new<T: Into<String>, N: Into<String>>(op_type: T, name: N) -> Self {
        Self {
            op_type: op_type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_inputs<S: IntoIterator<Item = T>, T: Into<String>>(self, inputs: S) -> Self {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_outputs<S: IntoIterator<Item = T>, T: Into<String>>(self, outputs: S) -> Self {
        Self {
            outputs: outputs.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_device_option(self, device_option: DeviceOption) -> Self {
        Self {
            device_option: Some(device_option),
            ..self
        }
    }

    pub fn with_arg<K: Into<String>, A: Into<Argument>>(mut self, key: K, arg: A) -> Self {
        self.args.insert(key.into(), arg.into());
        self
    }

    /// Name used in reports: the operator name, else its first output, else [`NO_OUTPUT`].
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            self.outputs.first().map(String::as_str).unwrap_or(NO_OUTPUT)
        }
    }

    pub fn arg_int(&self, key: &str) -> Option<i64> {
        match self.args.get(key)? {
            Argument::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn arg_float(&self, key: &str) -> Option<f32> {
        match self.args.get(key)? {
            Argument::Float(value) => Some(*value),
            Argument::Int(value) => Some(*value as f32),
            _ => None,
        }
    }

    /// Full human readable representation, used when an operator fails.
    pub fn debug_string(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Declarative description of a net. The order of `ops` is the execution order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetSpec {
    pub name: String,
    /// Name of the execution strategy, [`SIMPLE_NET_TYPE`] when absent.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub net_type: Option<String>,
    #[serde(default, rename = "op")]
    pub ops: Vec<OperatorSpec>,
    /// Default execution target for operators that don't carry their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_option: Option<DeviceOption>,
    #[serde(default)]
    pub external_inputs: Vec<String>,
    #[serde(default)]
    pub external_outputs: Vec<String>,
}

impl NetSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_op(mut self, op: OperatorSpec) -> Self {
        self.ops.push(op);
        self
    }

    pub fn with_device_option(self, device_option: DeviceOption) -> Self {
        Self {
            device_option: Some(device_option),
            ..self
        }
    }

    pub fn with_net_type<S: Into<String>>(self, net_type: S) -> Self {
        Self {
            net_type: Some(net_type.into()),
            ..self
        }
    }

    pub fn with_external_inputs<S: IntoIterator<Item = T>, T: Into<String>>(
        self,
        inputs: S,
    ) -> Self {
        Self {
            external_inputs: inputs.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn net_type(&self) -> &str {
        self.net_type.as_deref().unwrap_or(SIMPLE_NET_TYPE)
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("decoding net spec")
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("reading net spec {path:?}"))?;
        Self::from_json_str(&content)
    }

    /// Returns, in order, the operator spec each operator must be instantiated with.
    ///
    /// An operator without its own device option inherits a copy of the net's default, when
    /// the net defines one. Every other operator keeps pointing at its exact entry in `self`.
    pub fn resolved_operators(self: &Arc<Self>) -> impl Iterator<Item = DebugDef> + '_ {
        (0..self.ops.len()).map(move |index| {
            let op = &self.ops[index];
            match (&op.device_option, &self.device_option) {
                (None, Some(net_option)) => DebugDef::Resolved(Arc::new(OperatorSpec {
                    device_option: Some(net_option.clone()),
                    ..op.clone()
                })),
                _ => DebugDef::Shared {
                    net: Arc::clone(self),
                    index,
                },
            }
        })
    }
}

/// The operator spec an instantiated operator refers back to for debugging and reporting.
#[derive(Clone, Debug)]
pub enum DebugDef {
    /// Read-only reference to the exact entry of the net spec.
    Shared { net: Arc<NetSpec>, index: usize },
    /// Copy of the entry with the net default device option injected.
    Resolved(Arc<OperatorSpec>),
}

impl DebugDef {
    pub fn is_shared(&self) -> bool {
        matches!(self, DebugDef::Shared { .. })
    }
}

impl Deref for DebugDef {
    type Target = OperatorSpec;

    fn deref(&self) -> &OperatorSpec {
        match self {
            DebugDef::Shared { net, index } => &net.ops[*index],
            DebugDef::Resolved(spec) => spec,
        }
    }
}
