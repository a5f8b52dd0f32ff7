// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory GATT object tree.
//!
//! Nodes live in a flat arena owned by [`GattTree`]. Parents own their children
//! through index lists; children refer back to their parent by [`NodeId`] only.
//! Paths are assigned once, at insertion, from the parent path and the child's
//! position among its siblings.

use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// BlueZ GATT service interface.
pub const GATT_SERVICE_IFACE: &str = "org.bluez.GattService1";

/// BlueZ GATT characteristic interface.
pub const GATT_CHRC_IFACE: &str = "org.bluez.GattCharacteristic1";

/// BlueZ GATT descriptor interface.
pub const GATT_DESC_IFACE: &str = "org.bluez.GattDescriptor1";

/// Errors raised by the object model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("{path} does not implement interface {interface}")]
    UnknownInterface { path: String, interface: String },

    #[error("no GATT node with id {0}")]
    UnknownNode(usize),

    #[error("{child} cannot be attached to {parent}")]
    InvalidParent {
        parent: String,
        child: &'static str,
    },
}

/// Index of a node inside its [`GattTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Operations a characteristic or descriptor permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Flag {
    Read,
    Write,
    WriteWithoutResponse,
    Notify,
    Indicate,
}

impl Flag {
    /// BlueZ flag string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteWithoutResponse => "write-without-response",
            Self::Notify => "notify",
            Self::Indicate => "indicate",
        }
    }
}

/// A single value in a node's property bag.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Uuid(Uuid),
    Bool(bool),
    Path(String),
    Paths(Vec<String>),
    Flags(Vec<&'static str>),
}

/// Property name to value, for one interface.
pub type Properties = BTreeMap<&'static str, PropertyValue>;

/// Path to interface to properties, as returned by `GetManagedObjects`.
pub type ManagedObjects = BTreeMap<String, BTreeMap<&'static str, Properties>>;

/// What a node is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Application,
    Service {
        uuid: Uuid,
        primary: bool,
    },
    Characteristic {
        uuid: Uuid,
        flags: Vec<Flag>,
    },
    Descriptor {
        uuid: Uuid,
        flags: Vec<Flag>,
        value: Vec<u8>,
    },
}

impl NodeKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Service { .. } => "service",
            Self::Characteristic { .. } => "characteristic",
            Self::Descriptor { .. } => "descriptor",
        }
    }

    /// Interface the node is published under, if any.
    pub fn interface(&self) -> Option<&'static str> {
        match self {
            Self::Application => None,
            Self::Service { .. } => Some(GATT_SERVICE_IFACE),
            Self::Characteristic { .. } => Some(GATT_CHRC_IFACE),
            Self::Descriptor { .. } => Some(GATT_DESC_IFACE),
        }
    }

    /// Path segment prefix used for children of this kind.
    fn segment(&self) -> &'static str {
        match self {
            Self::Application => "app",
            Self::Service { .. } => "service",
            Self::Characteristic { .. } => "char",
            Self::Descriptor { .. } => "desc",
        }
    }
}

#[derive(Debug, Clone)]
struct GattNode {
    path: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Application root plus every service, characteristic and descriptor under it.
#[derive(Debug, Clone)]
pub struct GattTree {
    nodes: Vec<GattNode>,
}

impl GattTree {
    /// Create a tree holding only the application root at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.len() > 1 {
            path.trim_end_matches('/').to_string()
        } else {
            path
        };

        Self {
            nodes: vec![GattNode {
                path,
                kind: NodeKind::Application,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The application root.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append a service to the application.
    pub fn add_service(&mut self, uuid: Uuid, primary: bool) -> NodeId {
        self.push_child(self.root(), NodeKind::Service { uuid, primary })
    }

    /// Append a characteristic to `service`.
    pub fn add_characteristic(
        &mut self,
        service: NodeId,
        uuid: Uuid,
        flags: &[Flag],
    ) -> Result<NodeId, GattError> {
        self.attach(
            service,
            NodeKind::Characteristic {
                uuid,
                flags: flags.to_vec(),
            },
        )
    }

    /// Append a descriptor with a fixed value to `characteristic`.
    pub fn add_descriptor(
        &mut self,
        characteristic: NodeId,
        uuid: Uuid,
        flags: &[Flag],
        value: impl Into<Vec<u8>>,
    ) -> Result<NodeId, GattError> {
        self.attach(
            characteristic,
            NodeKind::Descriptor {
                uuid,
                flags: flags.to_vec(),
                value: value.into(),
            },
        )
    }

    fn attach(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, GattError> {
        let parent_node = self.node(parent)?;
        let allowed = matches!(
            (&parent_node.kind, &kind),
            (NodeKind::Application, NodeKind::Service { .. })
                | (NodeKind::Service { .. }, NodeKind::Characteristic { .. })
                | (NodeKind::Characteristic { .. }, NodeKind::Descriptor { .. })
        );
        if !allowed {
            return Err(GattError::InvalidParent {
                parent: parent_node.path.clone(),
                child: kind.name(),
            });
        }

        Ok(self.push_child(parent, kind))
    }

    fn push_child(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let parent_node = &self.nodes[parent.0];
        let index = parent_node.children.len();
        let base = if parent_node.path == "/" {
            ""
        } else {
            parent_node.path.as_str()
        };
        let path = format!("{}/{}{}", base, kind.segment(), index);

        let id = NodeId(self.nodes.len());
        self.nodes.push(GattNode {
            path,
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn node(&self, id: NodeId) -> Result<&GattNode, GattError> {
        self.nodes.get(id.0).ok_or(GattError::UnknownNode(id.0))
    }

    /// Object path of a node.
    pub fn path(&self, id: NodeId) -> Result<&str, GattError> {
        Ok(self.node(id)?.path.as_str())
    }

    /// Kind and static data of a node.
    pub fn kind(&self, id: NodeId) -> Result<&NodeKind, GattError> {
        Ok(&self.node(id)?.kind)
    }

    /// Owning node, `None` for the root.
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, GattError> {
        Ok(self.node(id)?.parent)
    }

    /// Children in insertion order.
    pub fn children(&self, id: NodeId) -> Result<&[NodeId], GattError> {
        Ok(&self.node(id)?.children)
    }

    /// Look up a node by object path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.path == path).map(NodeId)
    }

    /// First characteristic carrying `uuid`.
    pub fn find_characteristic(&self, uuid: Uuid) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| matches!(n.kind, NodeKind::Characteristic { uuid: u, .. } if u == uuid))
            .map(NodeId)
    }

    fn child_paths(&self, node: &GattNode) -> Vec<String> {
        node.children
            .iter()
            .map(|c| self.nodes[c.0].path.clone())
            .collect()
    }

    /// Property bag of `id` for `interface`.
    pub fn get_properties(&self, id: NodeId, interface: &str) -> Result<Properties, GattError> {
        let node = self.node(id)?;
        if node.kind.interface() != Some(interface) {
            return Err(GattError::UnknownInterface {
                path: node.path.clone(),
                interface: interface.to_string(),
            });
        }

        let parent_path = node
            .parent
            .map(|p| self.nodes[p.0].path.clone())
            .unwrap_or_default();

        let mut props = Properties::new();
        match &node.kind {
            NodeKind::Application => {}
            NodeKind::Service { uuid, primary } => {
                props.insert("UUID", PropertyValue::Uuid(*uuid));
                props.insert("Primary", PropertyValue::Bool(*primary));
                props.insert(
                    "Characteristics",
                    PropertyValue::Paths(self.child_paths(node)),
                );
            }
            NodeKind::Characteristic { uuid, flags } => {
                props.insert("Service", PropertyValue::Path(parent_path));
                props.insert("UUID", PropertyValue::Uuid(*uuid));
                props.insert(
                    "Flags",
                    PropertyValue::Flags(flags.iter().map(Flag::as_str).collect()),
                );
                props.insert("Descriptors", PropertyValue::Paths(self.child_paths(node)));
            }
            NodeKind::Descriptor { uuid, flags, .. } => {
                props.insert("Characteristic", PropertyValue::Path(parent_path));
                props.insert("UUID", PropertyValue::Uuid(*uuid));
                props.insert(
                    "Flags",
                    PropertyValue::Flags(flags.iter().map(Flag::as_str).collect()),
                );
            }
        }
        Ok(props)
    }

    /// Every published node under the root, keyed by path.
    ///
    /// The root itself is not listed; it only serves the object manager role.
    pub fn get_managed_snapshot(&self) -> ManagedObjects {
        let mut objects = ManagedObjects::new();
        let mut stack = vec![self.root()];

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if let Some(interface) = node.kind.interface() {
                if let Ok(props) = self.get_properties(id, interface) {
                    objects.insert(node.path.clone(), BTreeMap::from([(interface, props)]));
                }
            }
            stack.extend(node.children.iter().rev().copied());
        }

        objects
    }
}
