//! Two-level service tree: server -> service instance -> detail rows.
//!
//! Servers and services are kept sorted by key so row indices are stable
//! for a given content. Every structural mutation records a [`TreeChange`]
//! which the control loop drains after applying an event.

use shared::protocol::{IPV4_LABEL, IPV6_LABEL};
use shared::types::ServiceDetails;
use crate::error::TreeError;

pub type ServerKey = String;
pub type ServiceKey = String;

/// Stable identity of an expandable row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Server(ServerKey),
    Service(ServiceKey),
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    RowInserted(NodeKey),
    RowRemoved(NodeKey),
    /// A service row's value or detail children were replaced
    RowChanged(NodeKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn label(self) -> &'static str {
        match self {
            AddressFamily::V4 => IPV4_LABEL,
            AddressFamily::V6 => IPV6_LABEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeNode {
    pub name: String,
    pub value: String,
}

/// Addresses of one family. A single address is shown inline on the
/// family row; two or more become leaves below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressGroupNode {
    pub family: AddressFamily,
    pub addresses: Vec<String>,
}

impl AddressGroupNode {
    /// Returns `None` when there is nothing to show for the family.
    pub fn new(family: AddressFamily, addresses: Vec<String>) -> Option<Self> {
        if addresses.is_empty() {
            None
        } else {
            Some(Self { family, addresses })
        }
    }

    pub fn inline_value(&self) -> Option<&str> {
        match self.addresses.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Leaf rows below the family row
    pub fn leaves(&self) -> &[String] {
        if self.addresses.len() > 1 {
            &self.addresses
        } else {
            &[]
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailNode {
    AddressGroup(AddressGroupNode),
    Attribute(AttributeNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNode {
    key: ServiceKey,
    service_type: String,
    address_value: String,
    children: Vec<DetailNode>,
    pub expanded: bool,
}

impl ServiceNode {
    fn new(key: ServiceKey, service_type: String, details: &ServiceDetails) -> Self {
        let mut node = Self {
            key,
            service_type,
            address_value: String::new(),
            children: Vec::new(),
            expanded: false,
        };
        node.replace_details(details);
        node
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// `host:port` shown in the value column
    pub fn address_value(&self) -> &str {
        &self.address_value
    }

    pub fn children(&self) -> &[DetailNode] {
        &self.children
    }

    /// Discards every detail child and rebuilds them from `details`.
    pub fn replace_details(&mut self, details: &ServiceDetails) {
        self.children.clear();

        let ipv4 = details.ipv4.iter().map(ToString::to_string).collect();
        if let Some(group) = AddressGroupNode::new(AddressFamily::V4, ipv4) {
            self.children.push(DetailNode::AddressGroup(group));
        }
        let ipv6 = details.ipv6.iter().map(ToString::to_string).collect();
        if let Some(group) = AddressGroupNode::new(AddressFamily::V6, ipv6) {
            self.children.push(DetailNode::AddressGroup(group));
        }

        for (name, value) in &details.properties {
            if name.is_empty() {
                continue;
            }
            self.children.push(DetailNode::Attribute(AttributeNode {
                name: name.clone(),
                value: value.clone(),
            }));
        }

        self.address_value = details.address_value();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNode {
    key: ServerKey,
    services: Vec<ServiceNode>,
    pub expanded: bool,
}

impl ServerNode {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn services(&self) -> &[ServiceNode] {
        &self.services
    }

    /// Linear scan of the direct children
    pub fn find_service(&self, key: &str) -> Option<&ServiceNode> {
        self.services.iter().find(|s| s.key == key)
    }

    fn insert_sorted(&mut self, node: ServiceNode) -> usize {
        let idx = self
            .services
            .partition_point(|s| s.key.as_str() < node.key.as_str());
        self.services.insert(idx, node);
        idx
    }
}

/// Borrowed view of any row in the tree.
#[derive(Debug, Clone, Copy)]
pub enum TreeNode<'a> {
    Server(&'a ServerNode),
    Service(&'a ServiceNode),
    AddressGroup(&'a AddressGroupNode),
    Attribute(&'a AttributeNode),
    Address(&'a str),
}

impl<'a> TreeNode<'a> {
    pub fn row(&self) -> Row {
        match self {
            TreeNode::Server(server) => Row::new(&server.key, ""),
            TreeNode::Service(service) => Row::new(&service.key, service.address_value()),
            TreeNode::AddressGroup(group) => {
                Row::new(group.family.label(), group.inline_value().unwrap_or(""))
            }
            TreeNode::Attribute(attr) => Row::new(&attr.name, &attr.value),
            TreeNode::Address(addr) => Row::new("", addr),
        }
    }

    pub fn child_count(&self) -> usize {
        match self {
            TreeNode::Server(server) => server.services.len(),
            TreeNode::Service(service) => service.children.len(),
            TreeNode::AddressGroup(group) => group.leaves().len(),
            TreeNode::Attribute(_) | TreeNode::Address(_) => 0,
        }
    }

    pub fn child(&self, index: usize) -> Option<TreeNode<'a>> {
        match *self {
            TreeNode::Server(server) => server.services.get(index).map(TreeNode::Service),
            TreeNode::Service(service) => service.children.get(index).map(|child| match child {
                DetailNode::AddressGroup(group) => TreeNode::AddressGroup(group),
                DetailNode::Attribute(attr) => TreeNode::Attribute(attr),
            }),
            TreeNode::AddressGroup(group) => {
                group.leaves().get(index).map(|addr| TreeNode::Address(addr))
            }
            TreeNode::Attribute(_) | TreeNode::Address(_) => None,
        }
    }

    pub fn key(&self) -> Option<NodeKey> {
        match self {
            TreeNode::Server(server) => Some(NodeKey::Server(server.key.clone())),
            TreeNode::Service(service) => Some(NodeKey::Service(service.key.clone())),
            _ => None,
        }
    }
}

/// Label and value columns of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub label: String,
    pub value: String,
}

impl Row {
    fn new(label: &str, value: &str) -> Self {
        Self {
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

/// A row as currently visible on screen, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub depth: usize,
    pub row: Row,
    pub key: Option<NodeKey>,
    pub expanded: bool,
    pub has_children: bool,
}

#[derive(Debug, Default)]
pub struct ServiceTree {
    servers: Vec<ServerNode>,
    changes: Vec<TreeChange>,
}

impl ServiceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn servers(&self) -> &[ServerNode] {
        &self.servers
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn find_server(&self, key: &str) -> Option<&ServerNode> {
        self.servers.iter().find(|s| s.key == key)
    }

    /// Looks a service up across every server.
    pub fn find_service(&self, key: &str) -> Option<&ServiceNode> {
        self.servers.iter().find_map(|server| server.find_service(key))
    }

    /// Number of service nodes carrying `key`; anything above one is a
    /// broken invariant.
    pub fn service_matches(&self, key: &str) -> usize {
        self.servers
            .iter()
            .flat_map(|server| server.services.iter())
            .filter(|service| service.key == key)
            .count()
    }

    #[cfg(test)]
    pub fn service_count(&self) -> usize {
        self.servers.iter().map(|server| server.services.len()).sum()
    }

    /// Server that currently owns `key`
    pub fn owner_of(&self, key: &str) -> Option<&str> {
        self.locate(key).map(|(s, _)| self.servers[s].key.as_str())
    }

    fn locate(&self, key: &str) -> Option<(usize, usize)> {
        self.servers.iter().enumerate().find_map(|(s, server)| {
            server
                .services
                .iter()
                .position(|service| service.key == key)
                .map(|v| (s, v))
        })
    }

    fn server_index_or_insert(&mut self, key: &str) -> usize {
        match self.servers.binary_search_by(|s| s.key.as_str().cmp(key)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.servers.insert(
                    idx,
                    ServerNode {
                        key: key.to_string(),
                        services: Vec::new(),
                        expanded: false,
                    },
                );
                self.changes.push(TreeChange::RowInserted(NodeKey::Server(key.to_string())));
                idx
            }
        }
    }

    /// Creates the server row if needed, then the service row below it.
    pub fn insert_service(
        &mut self,
        server_key: &str,
        service_key: &str,
        service_type: &str,
        details: &ServiceDetails,
    ) -> Result<&mut ServiceNode, TreeError> {
        if self.locate(service_key).is_some() {
            return Err(TreeError::DuplicateInsert {
                service: service_key.to_string(),
            });
        }
        let node = ServiceNode::new(service_key.to_string(), service_type.to_string(), details);
        Ok(self.attach(server_key, node))
    }

    fn attach(&mut self, server_key: &str, node: ServiceNode) -> &mut ServiceNode {
        let s = self.server_index_or_insert(server_key);
        self.changes.push(TreeChange::RowInserted(NodeKey::Service(node.key.clone())));
        let v = self.servers[s].insert_sorted(node);
        &mut self.servers[s].services[v]
    }

    /// Replaces the details of an existing service. A service whose
    /// advertised server changed moves under the new server row, keeping
    /// its expansion state. Returns false if the service is absent.
    pub fn update_service(&mut self, key: &str, details: &ServiceDetails) -> bool {
        let Some((s, v)) = self.locate(key) else {
            return false;
        };

        if self.servers[s].key == details.server {
            self.servers[s].services[v].replace_details(details);
            self.changes.push(TreeChange::RowChanged(NodeKey::Service(key.to_string())));
            return true;
        }

        let mut node = self.detach(s, v);
        node.replace_details(details);
        self.attach(&details.server, node);
        true
    }

    fn detach(&mut self, s: usize, v: usize) -> ServiceNode {
        let node = self.servers[s].services.remove(v);
        self.changes.push(TreeChange::RowRemoved(NodeKey::Service(node.key.clone())));
        if self.servers[s].services.is_empty() {
            let server = self.servers.remove(s);
            self.changes.push(TreeChange::RowRemoved(NodeKey::Server(server.key)));
        }
        node
    }

    /// Removes the service and prunes its server if left childless.
    /// Returns the detached node, or `None` without error when the
    /// service is unknown.
    pub fn remove_service(&mut self, key: &str) -> Option<ServiceNode> {
        let (s, v) = self.locate(key)?;
        Some(self.detach(s, v))
    }

    pub fn clear(&mut self) {
        for server in self.servers.drain(..) {
            self.changes.push(TreeChange::RowRemoved(NodeKey::Server(server.key)));
        }
    }

    pub fn is_expanded(&self, key: &NodeKey) -> bool {
        match key {
            NodeKey::Server(k) => self.find_server(k).is_some_and(|s| s.expanded),
            NodeKey::Service(k) => self.find_service(k).is_some_and(|s| s.expanded),
        }
    }

    /// Returns false if no such row exists.
    pub fn set_expanded(&mut self, key: &NodeKey, expanded: bool) -> bool {
        match key {
            NodeKey::Server(k) => match self.servers.iter_mut().find(|s| &s.key == k) {
                Some(server) => {
                    server.expanded = expanded;
                    true
                }
                None => false,
            },
            NodeKey::Service(k) => match self.locate(k) {
                Some((s, v)) => {
                    self.servers[s].services[v].expanded = expanded;
                    true
                }
                None => false,
            },
        }
    }

    /// Drains the change notifications recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<TreeChange> {
        std::mem::take(&mut self.changes)
    }

    fn node_at(&self, path: &[usize]) -> Option<TreeNode<'_>> {
        let (first, rest) = path.split_first()?;
        let mut node = TreeNode::Server(self.servers.get(*first)?);
        for idx in rest {
            node = node.child(*idx)?;
        }
        Some(node)
    }

    /// Number of child rows below `parent`; the empty path is the root.
    pub fn row_count(&self, parent: &[usize]) -> usize {
        if parent.is_empty() {
            return self.servers.len();
        }
        self.node_at(parent).map_or(0, |node| node.child_count())
    }

    pub fn row_at(&self, parent: &[usize], index: usize) -> Option<Row> {
        let mut path = parent.to_vec();
        path.push(index);
        self.node_at(&path).map(|node| node.row())
    }

    /// Flattens the rows the user can currently see, walking the tree
    /// through `row_count`/`row_at`. Rows without a key (address groups)
    /// are always open, so their leaves show below an expanded service.
    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        let mut rows = Vec::new();
        self.push_visible(&mut Vec::new(), &mut rows);
        rows
    }

    fn push_visible(&self, path: &mut Vec<usize>, rows: &mut Vec<VisibleRow>) {
        for index in 0..self.row_count(path) {
            let Some(row) = self.row_at(path, index) else { continue };
            path.push(index);
            let has_children = self.row_count(path) > 0;
            let key = self.node_at(path).and_then(|node| node.key());
            let open = has_children && key.as_ref().map_or(true, |k| self.is_expanded(k));
            rows.push(VisibleRow {
                depth: path.len() - 1,
                row,
                key,
                expanded: open,
                has_children,
            });
            if open {
                self.push_visible(path, rows);
            }
            path.pop();
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_unchecked(&mut self, server_key: &str, service_key: &str, details: &ServiceDetails) {
        let node = ServiceNode::new(service_key.to_string(), String::new(), details);
        let s = self.server_index_or_insert(server_key);
        self.servers[s].services.push(node);
    }
}
