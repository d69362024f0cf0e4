use crate::config::ViewConfig;
use crate::tree::{DetailNode, ServiceNode, ServiceTree};

/// Derives the tree pane height from what is currently expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingPolicy {
    pub base_offset: u32,
    pub row_height: u32,
}

impl SizingPolicy {
    pub fn new(config: &ViewConfig) -> Self {
        Self {
            base_offset: config.base_offset,
            row_height: config.row_height,
        }
    }

    /// Rows on screen: every server, plus the children of expanded servers,
    /// plus the detail rows of expanded services.
    pub fn visible_rows(tree: &ServiceTree) -> u32 {
        tree.servers()
            .iter()
            .map(|server| {
                let children: u32 = if server.expanded {
                    server.services().iter().map(service_rows).sum()
                } else {
                    0
                };
                1 + children
            })
            .sum()
    }

    pub fn target_height(&self, tree: &ServiceTree) -> u32 {
        self.base_offset + self.row_height * Self::visible_rows(tree)
    }
}

fn service_rows(service: &ServiceNode) -> u32 {
    if !service.expanded {
        return 1;
    }
    let details: u32 = service
        .children()
        .iter()
        .map(|child| match child {
            DetailNode::Attribute(_) => 1,
            DetailNode::AddressGroup(group) => 1 + group.leaves().len() as u32,
        })
        .sum();
    1 + details
}
