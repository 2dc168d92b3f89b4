use crate::mindmap::{MindMapData, MindMapNode};

/// Markmap-compatible markdown: the title as a heading, nodes as nested
/// bullets.
pub fn to_outline(mindmap: &MindMapData) -> String {
    let mut out = format!("# {}\n", mindmap.title_or_default());
    for node in &mindmap.children {
        write_outline_node(&mut out, node, 0);
    }
    out
}

fn write_outline_node(out: &mut String, node: &MindMapNode, depth: usize) {
    out.push_str(&"  ".repeat(depth));
    out.push_str("- ");
    out.push_str(node.text.trim());
    out.push('\n');
    for child in &node.children {
        write_outline_node(out, child, depth + 1);
    }
}

/// Mermaid `mindmap` source; used as the archived thumbnail reference.
pub fn to_mermaid(mindmap: &MindMapData) -> String {
    let mut out = String::from("mindmap\n");
    out.push_str(&format!(
        "  root(({}))\n",
        mermaid_label(mindmap.title_or_default())
    ));
    for node in &mindmap.children {
        write_mermaid_node(&mut out, node, 2);
    }
    out
}

fn write_mermaid_node(out: &mut String, node: &MindMapNode, depth: usize) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&mermaid_label(&node.text));
    out.push('\n');
    for child in &node.children {
        write_mermaid_node(out, child, depth + 1);
    }
}

// Shape delimiters and line breaks would be parsed as syntax.
fn mermaid_label(text: &str) -> String {
    let cleaned = text
        .chars()
        .map(|c| match c {
            '(' | ')' | '[' | ']' | '{' | '}' | '\n' | '\r' => ' ',
            other => other,
        })
        .collect::<String>();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "untitled".to_string()
    } else {
        collapsed
    }
}
