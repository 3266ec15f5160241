// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DOM snapshots reported by the renderer.
//!
//! Only the parts the capture agent needs are modelled: element handles,
//! input attributes, light children, and open shadow roots.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomNode {
    /// Renderer-assigned handle used to address the element in commands.
    pub id: String,
    /// Lower-case tag name.
    pub tag: String,
    /// `type` attribute for inputs.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocomplete: Option<String>,
    /// Current value for form fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DomNode>,
    /// Children of the element's open shadow root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadow: Vec<DomNode>,
}

impl DomNode {
    pub fn element(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self { id: id.into(), tag: tag.into().to_ascii_lowercase(), ..Self::default() }
    }

    pub fn input(id: impl Into<String>, input_type: &str) -> Self {
        Self { input_type: Some(input_type.to_owned()), ..Self::element(id, "input") }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_children(mut self, children: Vec<DomNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_shadow(mut self, shadow: Vec<DomNode>) -> Self {
        self.shadow = shadow;
        self
    }

    /// `<input>` or `<textarea>`.
    pub fn is_text_field(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea")
    }

    pub fn is_password(&self) -> bool {
        self.tag == "input"
            && self.input_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("password"))
    }

    /// An input a user name or email can be typed into.
    pub fn is_username_like(&self) -> bool {
        if self.tag != "input" || self.read_only {
            return false;
        }
        let ty = self.input_type.as_deref().unwrap_or("text").to_ascii_lowercase();
        matches!(ty.as_str(), "text" | "email" | "")
    }

    /// Depth-first walk over light children and shadow content.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// First field satisfying `pred`, searching into shadow roots.
    pub fn find_input<P>(&self, mut pred: P) -> Option<&DomNode>
    where
        P: FnMut(&DomNode) -> bool,
    {
        self.walk().find(|n| n.is_text_field() && pred(n))
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut DomNode> {
        if self.id == id {
            return Some(self);
        }
        for child in self.children.iter_mut().chain(self.shadow.iter_mut()) {
            if let Some(found) = child.find_by_id_mut(id) {
                return Some(found);
            }
        }
        None
    }
}

pub struct Walk<'a> {
    stack: Vec<&'a DomNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a DomNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push in reverse so document order comes out first; shadow content
        // is visited before light children, as it renders in their place.
        self.stack.extend(node.children.iter().rev());
        self.stack.extend(node.shadow.iter().rev());
        Some(node)
    }
}
