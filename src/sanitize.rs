//! Batch-mode HTML sanitizer: strips `<script>` subtrees and event-handler
//! attributes from a rendered document.

use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::Html;

/// Elements that never take a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Whether an attribute key names an event handler.
///
/// Every attribute starting with "on" is treated as a handler. There are
/// currently no standard "on"-prefixed attributes that are not handlers
/// (see the WHATWG attribute list); if that ever changes this should become
/// an allowlist.
pub fn is_event_handler(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2
        && bytes[0].eq_ignore_ascii_case(&b'o')
        && bytes[1].eq_ignore_ascii_case(&b'n')
}

/// Re-serializes `html` without `<script>` elements (including their text)
/// and without `on*` attributes. `<style>` text is emitted as literal CSS.
/// Output is stable under repeated sanitization, modulo parser
/// normalization of the first pass.
pub fn sanitize(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len());
    for child in document.tree.root().children() {
        write_node(child, &mut out, false);
    }
    out
}

fn write_node(node: NodeRef<'_, Node>, out: &mut String, raw_text: bool) {
    match node.value() {
        Node::Document | Node::Fragment => {
            for child in node.children() {
                write_node(child, out, raw_text);
            }
        }
        Node::Doctype(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(&doctype.name);
            out.push('>');
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(&comment);
            out.push_str("-->");
        }
        Node::Text(text) => {
            if raw_text {
                out.push_str(&text);
            } else {
                push_escaped_text(out, &text);
            }
        }
        Node::Element(element) => {
            let name = element.name();
            if name.eq_ignore_ascii_case("script") {
                return;
            }
            out.push('<');
            out.push_str(name);
            for (key, value) in element.attrs() {
                if is_event_handler(key) {
                    continue;
                }
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                push_escaped_attr(out, value);
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&name) {
                return;
            }
            let raw = name.eq_ignore_ascii_case("style");
            for child in node.children() {
                write_node(child, out, raw);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Node::ProcessingInstruction(_) => {}
    }
}

fn push_escaped_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn push_escaped_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}
