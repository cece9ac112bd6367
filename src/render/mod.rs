//! Section hierarchy reconstruction for display and re-export.

mod tree;

use std::fmt::Write;

pub use tree::{build_rendering_tree, MissingChildPolicy, RenderOptions, RenderingTree, SectionRenderingNode};

use crate::db::DocumentTree;

/// Rendering tree for a document loaded from the store.
pub fn document_rendering_tree(document: &DocumentTree, options: RenderOptions) -> RenderingTree {
    build_rendering_tree(&document.sections, &document.edges, options)
}

fn outline_node(node: &SectionRenderingNode, indent: usize, out: &mut String) {
    let title = node.section.title.as_deref().unwrap_or("(untitled)");
    let _ = write!(out, "{}{}", "  ".repeat(indent), title);
    if let Some(code) = &node.section.code.code {
        let _ = write!(out, " [{}]", code);
    }
    out.push('\n');
    for child in &node.child_nodes {
        outline_node(child, indent + 1, out);
    }
}

/// Indented plain-text outline, one section per line.
pub fn render_outline(tree: &RenderingTree) -> String {
    let mut out = String::new();
    for node in &tree.nodes {
        outline_node(node, 0, &mut out);
    }
    for warning in &tree.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    out
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::db::SplDb;
    use crate::spl::context::FeatureFlags;
    use crate::spl::parse_document;
    use crate::spl::parsers::ParserRegistry;
    use crate::test_support::{SAMPLE_SPL, SAMPLE_SPL_GUID};

    fn load(flags: FeatureFlags) -> DocumentTree {
        let mut db = SplDb::in_memory().unwrap();
        let registry = ParserRegistry::standard();
        let uow = db.begin().unwrap();
        parse_document(&uow, &registry, flags, None, SAMPLE_SPL, Uuid::nil(), None).unwrap();
        uow.commit().unwrap();
        db.load_document_tree(Uuid::parse_str(SAMPLE_SPL_GUID).unwrap())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_outline_of_imported_document() {
        let tree = document_rendering_tree(&load(FeatureFlags::default()), RenderOptions::default());
        let outline = render_outline(&tree);

        let expected = "\
1 INDICATIONS AND USAGE [34067-9]
  1.1 Adults
  1.2 Children
PRODUCT DATA [48780-1]
2 SEE ALSO
  1.1 Adults
";
        assert_eq!(outline, expected);
    }

    #[test]
    fn test_same_tree_for_both_strategies() {
        let staged = FeatureFlags {
            use_staged_bulk: true,
            ..Default::default()
        };
        let a = render_outline(&document_rendering_tree(&load(FeatureFlags::default()), RenderOptions::default()));
        let b = render_outline(&document_rendering_tree(&load(staged), RenderOptions::default()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nodes_serialize() {
        let tree = document_rendering_tree(&load(FeatureFlags::default()), RenderOptions::default());
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(json["nodes"][0]["child_nodes"][1]["section"]["title"], "1.2 Children");
        assert_eq!(json["nodes"][1]["is_standalone"], true);
    }
}
