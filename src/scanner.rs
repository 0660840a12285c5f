//! Discovery of the named template fragments in a document, building
//! the branch index. Scanning is destructive: every canonical
//! fragment is taken out of the document and replaced by an empty
//! marker pointing at its path.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use fdom::{Dom, IntoKString, NodeId};

use crate::{branch::BranchId,
            config::FractalConfig,
            error::FractalErrorKind,
            fractal::Fractal,
            trace,
            view::ViewInstance};

/// The fragments belonging directly to `el` (to its content, for a
/// template), optionally only those named `name`. Fragments nested in
/// another fragment or in a cloned subtree below `el` don't count.
pub fn find_templates(
    config: &FractalConfig,
    dom: &Dom,
    el: NodeId,
    name: Option<&str>
) -> Vec<NodeId> {
    let root = dom.content_root(el);
    dom.descendants(root)
        .filter(|id| config.is_fragment_element(dom, *id))
        .filter(|id| match name {
            Some(name) => dom.attribute(*id, &config.name_attribute) == Some(name),
            None => true
        })
        .filter(|id| scope_of(config, dom, root, *id) == Some(root))
        .collect()
}

/// The closest scope boundary above `id`, `root` counting as one.
fn scope_of(config: &FractalConfig, dom: &Dom, root: NodeId, id: NodeId) -> Option<NodeId> {
    let mut cur = dom.parent(id);
    while let Some(c) = cur {
        if c == root || config.is_scope_boundary(dom, c) {
            return Some(c)
        }
        cur = dom.parent(c);
    }
    None
}

/// Whether `id` holds nothing but whitespace.
fn is_blank(dom: &Dom, id: NodeId) -> bool {
    dom.children(id).iter().all(|c| dom.text(*c).map_or(false, |t| t.trim().is_empty()))
}

impl Fractal {
    /// Index all template fragments below `root`, then resolve the
    /// definitions made so far. Can only be done once.
    pub fn scan(&mut self, root: NodeId) -> Result<()> {
        if self.is_scanned() {
            return FractalErrorKind::AlreadyScanned.err();
        }
        self.dom.node(root)?;
        let root_branch = self.branches.root();
        self.scan_level(root, root_branch)?;
        self.branches.resolve_references()?;
        trace!("scanned {} templates", self.branches.len());

        let root_view = self.views.insert(ViewInstance::root(self.base_view, root_branch, root));
        self.root_view = Some(root_view);
        self.resolve_pending()
    }

    fn scan_level(&mut self, el: NodeId, branch: BranchId) -> Result<()> {
        let matches = find_templates(&self.config, &self.dom, el, None);
        let mut seen = HashSet::new();
        for template in matches {
            let name = self.dom.attribute(template, &self.config.name_attribute)
                .ok_or_else(|| anyhow!("template {template:?} lost its name"))?
                .into_kstring();
            let reference = self.dom.attribute(template, &self.config.ref_attribute)
                .filter(|r| ! r.is_empty())
                .map(|r| r.into_kstring());
            let parent_path = self.branches.get(branch)?.path().to_string();
            if ! seen.insert(name.clone()) {
                return FractalErrorKind::DuplicateBranch {
                    path: parent_path.into_kstring(),
                    name
                }.err();
            }

            if let Some(target) = &reference {
                let content = self.dom.content_root(template);
                if ! is_blank(&self.dom, content) {
                    let path = crate::branch::join_path(&parent_path, &name);
                    return FractalErrorKind::ReferenceHasContent {
                        path,
                        target: target.clone()
                    }.err();
                }
                for c in self.dom.children(content).to_vec() {
                    self.dom.detach(c)?;
                    self.dom.release(c)?;
                }
                let child = self.branches.insert_child(branch, &name, Some(target), None)?;
                trace!("scan: {:?} references {target:?}",
                       self.branches.get(child)?.path());
            } else {
                let child = self.branches.insert_child(branch, &name, None, Some(template))?;
                let path = self.branches.get(child)?.path().to_string();
                trace!("scan: template {path:?}");
                self.replace_with_marker(template, &name, &path)?;
                self.scan_level(template, child)?;
            }
        }
        Ok(())
    }

    /// Put an empty marker pointing at `path` where `template` was.
    fn replace_with_marker(&mut self, template: NodeId, name: &str, path: &str) -> Result<()> {
        let parent = self.dom.parent(template)
            .ok_or_else(|| anyhow!("template {path:?} is not attached"))?;
        let marker = self.dom.create_element(self.config.template_tag.as_str());
        self.dom.set_attribute(marker, self.config.name_attribute.as_str(), name)?;
        self.dom.set_attribute(marker, self.config.ref_attribute.as_str(), path)?;
        if ! self.config.native_templates {
            self.dom.set_attribute(marker, self.config.marker_attribute.as_str(), "")?;
        }
        self.dom.replace_child(parent, marker, template)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use fdom::{inner_html_string, Print};
    use crate::error::error_kind;

    fn scan(config: FractalConfig, markup: &str) -> Result<(Fractal, NodeId)> {
        let mut fx = Fractal::new(config);
        let body = fx.load_markup(markup)?;
        fx.scan(body)?;
        Ok((fx, body))
    }

    const PAGE: &str = "<body><h1>Title</h1>\
        <template data-name=\"list\"><ul>\
          <template data-name=\"item\"><li>{name}</li></template>\
        </ul></template>\
        <div><template data-name=\"other\"><p>\
          <template data-name=\"item\"><b></b></template>\
        </p></template></div>\
        <template data-name=\"alias\" data-ref=\"list\"> </template>\
        </body>";

    #[test]
    fn t_scan() -> Result<()> {
        let (fx, body) = scan(FractalConfig::default(), PAGE)?;
        let b = fx.branches();
        assert_eq!(b.paths().collect::<Vec<_>>(),
                   vec!["alias", "list", "list.item", "other", "other.item"]);
        let list = b.get_branch("list")?;
        let item = b.get_branch("list.item")?;
        assert_eq!(b.get(item)?.path(), "list.item");
        assert_eq!(b.get(list)?.children().get("item"), Some(&item));
        assert_eq!(b.get(b.get_branch("alias")?)?.reference_target(), Some(list));

        // canonical templates were replaced by markers
        assert_eq!(inner_html_string(fx.dom(), body)?,
                   "<h1>Title</h1>\
                    <template data-name=\"list\" data-ref=\"list\"></template>\
                    <div><template data-name=\"other\" data-ref=\"other\"></template></div>\
                    <template data-name=\"alias\" data-ref=\"list\"></template>");
        // and nested ones inside the detached originals
        let tpl = b.get(list)?.template().unwrap();
        assert_eq!(fx.dom().content_root(tpl).to_html_fragment_string(fx.dom())?,
                   "<ul><template data-name=\"item\" data-ref=\"list.item\"></template></ul>");
        Ok(())
    }

    #[test]
    fn t_path_uniqueness() -> Result<()> {
        let (fx, _) = scan(FractalConfig::default(), PAGE)?;
        let b = fx.branches();
        let mut seen = HashSet::new();
        for path in b.paths() {
            for id in b.index_of(path) {
                let p = b.get(*id)?.path().to_string();
                if p == path {
                    assert!(seen.insert(p));
                }
            }
        }
        assert_eq!(seen.len(), b.len());
        Ok(())
    }

    #[test]
    fn t_scan_inline() -> Result<()> {
        let config = FractalConfig { native_templates: false, ..Default::default() };
        let (fx, body) = scan(config, "<body>\
            <div data-template=\"\" data-name=\"list\"><ul>\
              <template data-name=\"item\"><li></li></template>\
            </ul></div></body>")?;
        assert_eq!(fx.branches().paths().collect::<Vec<_>>(), vec!["list", "list.item"]);
        assert_eq!(inner_html_string(fx.dom(), body)?,
                   "<template data-name=\"list\" data-ref=\"list\" data-template=\"\"></template>");
        Ok(())
    }

    #[test]
    fn t_scan_errors() -> Result<()> {
        let e = scan(FractalConfig::default(),
                     "<body><template data-name=\"a\"></template>\
                      <p><template data-name=\"a\"></template></p></body>").err().unwrap();
        assert_eq!(e.to_string(), "duplicate template name \"a\" in \"\"");

        let e = scan(FractalConfig::default(),
                     "<body><template data-name=\"a\" data-ref=\"b\"></template></body>")
            .err().unwrap();
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::ReferenceNotFound { .. })));

        let e = scan(FractalConfig::default(),
                     "<body><template data-name=\"b\"></template>\
                      <template data-name=\"a\" data-ref=\"b\"><p></p></template></body>")
            .err().unwrap();
        assert_eq!(e.to_string(), "template \"a\" references \"b\" and must be empty");

        let (mut fx, body) = scan(FractalConfig::default(), "<body></body>")?;
        let e = fx.scan(body).err().unwrap();
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::AlreadyScanned)));
        Ok(())
    }

    #[test]
    fn t_find_templates_scope() -> Result<()> {
        let config = FractalConfig::default();
        let mut dom = Dom::new(config.template_mode());
        let frag = dom.parse_fragment(
            "<div><template data-name=\"a\"></template>\
             <section data-clone=\"true\"><template data-name=\"b\"></template></section>\
             <p><template data-name=\"a\"></template></p></div>")?;
        let div = dom.first_child(frag).unwrap();
        assert_eq!(find_templates(&config, &dom, div, None).len(), 2);
        assert_eq!(find_templates(&config, &dom, div, Some("a")).len(), 2);
        assert_eq!(find_templates(&config, &dom, div, Some("b")).len(), 0);
        Ok(())
    }
}
