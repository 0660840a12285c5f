//! How template fragments are recognized in the markup.

use std::path::Path;

use anyhow::{Context, Result};
use fdom::{Dom, NodeId, TemplateMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FractalConfig {
    /// Tag of fragment elements.
    pub template_tag: String,
    /// Attribute carrying the fragment name.
    pub name_attribute: String,
    /// Attribute turning a fragment into a reference to another
    /// fragment's dotted path; also set on the markers left behind by
    /// scanning.
    pub ref_attribute: String,
    /// Set to "true" on the top-level elements of cloned fragments.
    pub clone_attribute: String,
    /// For targets without native templates: marks any element as a
    /// fragment.
    pub marker_attribute: String,
    /// Whether template content lives in a separate content fragment
    /// (like `HTMLTemplateElement.content`).
    pub native_templates: bool,
}

impl Default for FractalConfig {
    fn default() -> Self {
        FractalConfig {
            template_tag: "template".into(),
            name_attribute: "data-name".into(),
            ref_attribute: "data-ref".into(),
            clone_attribute: "data-clone".into(),
            marker_attribute: "data-template".into(),
            native_templates: true,
        }
    }
}

impl FractalConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path:?}"))?;
        Self::from_json_str(&s)
            .with_context(|| format!("parsing config file {path:?}"))
    }

    pub fn template_mode(&self) -> TemplateMode {
        if self.native_templates {
            TemplateMode::Native
        } else {
            TemplateMode::Inline
        }
    }

    /// Whether `id` is a named template fragment.
    pub fn is_fragment_element(&self, dom: &Dom, id: NodeId) -> bool {
        dom.has_attribute(id, &self.name_attribute)
            && (dom.is_tag(id, &self.template_tag)
                || (! self.native_templates
                    && dom.has_attribute(id, &self.marker_attribute)))
    }

    /// Whether `id` delimits a scope when looking for fragments: a
    /// template element, a detached fragment, or the top of a cloned
    /// subtree.
    pub fn is_scope_boundary(&self, dom: &Dom, id: NodeId) -> bool {
        dom.is_fragment(id)
            || dom.is_tag(id, &self.template_tag)
            || self.is_fragment_element(dom, id)
            || dom.attribute(id, &self.clone_attribute) == Some("true")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_from_json() -> Result<()> {
        let c = FractalConfig::from_json_str(
            r#"{"name_attribute": "name", "native_templates": false}"#)?;
        assert_eq!(c.name_attribute, "name");
        assert_eq!(c.template_tag, "template");
        assert_eq!(c.template_mode(), TemplateMode::Inline);
        assert!(FractalConfig::from_json_str(r#"{"nme": "x"}"#).is_err());
        Ok(())
    }

    #[test]
    fn t_fragment_recognition() -> Result<()> {
        let c = FractalConfig { native_templates: false, ..Default::default() };
        let mut dom = Dom::new(c.template_mode());
        let frag = dom.parse_fragment(
            "<template data-name=\"a\"></template>\
             <div data-template=\"\" data-name=\"b\"></div>\
             <div data-name=\"c\"></div>\
             <template></template>")?;
        let kids = dom.children(frag).to_vec();
        let rec: Vec<bool> = kids.iter().map(|id| c.is_fragment_element(&dom, *id)).collect();
        assert_eq!(rec, vec![true, true, false, false]);
        assert!(c.is_scope_boundary(&dom, kids[3]));
        assert!(! c.is_scope_boundary(&dom, kids[2]));
        Ok(())
    }
}
