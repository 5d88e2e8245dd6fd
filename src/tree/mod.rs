//! The action tree.
//!
//! All nodes of a macro live in one [`ActionTree`] arena and are addressed by
//! [`NodeId`]. Containers own their children through an ordered list of ids; the
//! `parent` of a node is a plain back-reference used for navigation only.
//!
//! The root is always a `loop` with an empty UID, a count of 1 and the name
//! `"root"`. Every other node carries a unique UID assigned when it is created.

pub mod action;

pub use action::{
    Action, ActionType, Bounds, IMAGE_MATCH_POINT, IconTarget, ImageSearch, KeyState,
    MouseButton, Point, SearchArea,
};

use std::collections::HashSet;
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

use crate::config::NodeDef;

/// Name of the root loop.
pub const ROOT_NAME: &str = "root";

/// Structural errors: the tree shape would break an invariant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {0:?} does not belong to this tree")]
    UnknownNode(NodeId),

    #[error("{action_type} node '{uid}' cannot hold sub-actions")]
    NotAContainer { uid: String, action_type: ActionType },

    #[error("node '{uid}' is already attached to a container")]
    AlreadyAttached { uid: String },

    #[error("the root node cannot be attached to another container")]
    RootNotAttachable,

    #[error("attaching '{uid}' would make it its own ancestor")]
    Cycle { uid: String },

    #[error("duplicate UID '{uid}'")]
    DuplicateUid { uid: String },

    #[error("node '{uid}' is listed more than once")]
    RepeatedChild { uid: String },
}

/// Index of a node inside its [`ActionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    uid: String,
    parent: Option<NodeId>,
    action: Action,
    children: Vec<NodeId>,
}

/// Arena owning every node of one macro.
#[derive(Debug, Clone)]
pub struct ActionTree {
    nodes: Vec<Node>,
    uids: HashSet<String>,
}

impl Default for ActionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionTree {
    /// An empty macro: just the root loop.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                uid: String::new(),
                parent: None,
                action: Action::repeat(1, ROOT_NAME),
                children: Vec::new(),
            }],
            uids: HashSet::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Create a detached node with a fresh UID.
    pub fn create(&mut self, action: Action) -> NodeId {
        let mut uid = Uuid::new_v4().to_string();
        while self.uids.contains(&uid) {
            uid = Uuid::new_v4().to_string();
        }
        self.push(uid, action)
    }

    /// Create a detached node with a given UID (used when loading saved macros).
    pub fn create_with_uid(&mut self, uid: &str, action: Action) -> Result<NodeId, TreeError> {
        if uid.is_empty() || self.uids.contains(uid) {
            return Err(TreeError::DuplicateUid {
                uid: uid.to_string(),
            });
        }
        Ok(self.push(uid.to_string(), action))
    }

    fn push(&mut self, uid: String, action: Action) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.uids.insert(uid.clone());
        self.nodes.push(Node {
            uid,
            parent: None,
            action,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(id.0).ok_or(TreeError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(id.0).ok_or(TreeError::UnknownNode(id))
    }

    pub fn uid(&self, id: NodeId) -> Result<&str, TreeError> {
        Ok(&self.node(id)?.uid)
    }

    pub fn action(&self, id: NodeId) -> Result<&Action, TreeError> {
        Ok(&self.node(id)?.action)
    }

    pub fn action_type(&self, id: NodeId) -> Result<ActionType, TreeError> {
        Ok(self.node(id)?.action.action_type())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        Ok(self.node(id)?.parent)
    }

    /// Overwrite the parent back-reference without touching any child list.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), TreeError> {
        if let Some(p) = parent {
            self.node(p)?;
        }
        self.node_mut(id)?.parent = parent;
        Ok(())
    }

    fn container(&self, id: NodeId) -> Result<&Node, TreeError> {
        let node = self.node(id)?;
        if !node.action.is_container() {
            return Err(TreeError::NotAContainer {
                uid: node.uid.clone(),
                action_type: node.action.action_type(),
            });
        }
        Ok(node)
    }

    pub fn sub_actions(&self, id: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(&self.container(id)?.children)
    }

    /// Append `child` to `container` and point its parent at `container`.
    pub fn add_sub_action(&mut self, container: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.check_attachable(container, child)?;
        self.nodes[child.0].parent = Some(container);
        self.nodes[container.0].children.push(child);
        trace!(
            target: "macrotree::tree",
            container = %self.nodes[container.0].uid,
            child = %self.nodes[child.0].uid,
            "attached sub-action"
        );
        Ok(())
    }

    /// Remove the first occurrence of `child` from `container`.
    ///
    /// Returns whether anything was removed. The removed node's parent is cleared.
    pub fn remove_sub_action(&mut self, container: NodeId, child: NodeId) -> Result<bool, TreeError> {
        self.container(container)?;
        self.node(child)?;
        let children = &mut self.nodes[container.0].children;
        let Some(pos) = children.iter().position(|c| *c == child) else {
            return Ok(false);
        };
        children.remove(pos);
        self.nodes[child.0].parent = None;
        Ok(true)
    }

    /// Replace the children of `container` wholesale.
    pub fn set_sub_actions(&mut self, container: NodeId, children: Vec<NodeId>) -> Result<(), TreeError> {
        self.container(container)?;
        let previous = std::mem::take(&mut self.nodes[container.0].children);
        for id in &previous {
            self.nodes[id.0].parent = None;
        }

        let mut accepted = Vec::with_capacity(children.len());
        for &child in &children {
            let result = if accepted.contains(&child) {
                Err(TreeError::RepeatedChild {
                    uid: self.nodes[child.0].uid.clone(),
                })
            } else {
                self.check_attachable(container, child)
            };
            if let Err(err) = result {
                // Put the old children back so a rejected list leaves the tree untouched.
                for id in &accepted {
                    self.nodes[id.0].parent = None;
                }
                for id in &previous {
                    self.nodes[id.0].parent = Some(container);
                }
                self.nodes[container.0].children = previous;
                return Err(err);
            }
            self.nodes[child.0].parent = Some(container);
            accepted.push(child);
        }
        self.nodes[container.0].children = children;
        Ok(())
    }

    fn check_attachable(&self, container: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.container(container)?;
        let node = self.node(child)?;
        if child == self.root() {
            return Err(TreeError::RootNotAttachable);
        }
        if node.parent.is_some() {
            return Err(TreeError::AlreadyAttached {
                uid: node.uid.clone(),
            });
        }
        let mut cursor = Some(container);
        while let Some(id) = cursor {
            if id == child {
                return Err(TreeError::Cycle {
                    uid: node.uid.clone(),
                });
            }
            cursor = self.nodes[id.0].parent;
        }
        Ok(())
    }

    /// Find a node by UID: `from` itself, then its descendants depth-first in order.
    pub fn get_action(&self, from: NodeId, uid: &str) -> Option<NodeId> {
        let node = self.nodes.get(from.0)?;
        if node.uid == uid {
            return Some(from);
        }
        node.children
            .iter()
            .find_map(|&child| self.get_action(child, uid))
    }

    /// Build a tree from its saved form. Nodes without a UID get a fresh one.
    pub fn from_defs(defs: &[NodeDef]) -> Result<Self, TreeError> {
        let mut tree = Self::new();
        let root = tree.root();
        for def in defs {
            tree.attach_def(root, def)?;
        }
        Ok(tree)
    }

    fn attach_def(&mut self, container: NodeId, def: &NodeDef) -> Result<NodeId, TreeError> {
        let id = match def.uid.as_deref() {
            Some(uid) => self.create_with_uid(uid, def.action.clone())?,
            None => self.create(def.action.clone()),
        };
        self.add_sub_action(container, id)?;
        for child in &def.sub_actions {
            self.attach_def(id, child)?;
        }
        Ok(id)
    }

    /// The saved form of the root's children.
    pub fn to_defs(&self) -> Vec<NodeDef> {
        self.nodes[0]
            .children
            .iter()
            .map(|&id| self.def_of(id))
            .collect()
    }

    fn def_of(&self, id: NodeId) -> NodeDef {
        let node = &self.nodes[id.0];
        NodeDef {
            uid: Some(node.uid.clone()),
            action: node.action.clone(),
            sub_actions: node.children.iter().map(|&c| self.def_of(c)).collect(),
        }
    }
}
