use std::fmt::{self, Write};

use crate::{DELIMITERS, FlatTree};

impl fmt::Display for FlatTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self, self.root())?;
        f.write_char(';')
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, tree: &FlatTree, index: usize) -> fmt::Result {
    let node = tree.node(index);

    if !node.is_leaf() {
        f.write_char('(')?;
        for (i, &child) in node.children().iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write_node(f, tree, child)?;
        }
        f.write_char(')')?;
    }

    if let Some(label) = node.label() {
        write_label(f, label)?;
    }

    if !node.annotations().is_empty() {
        f.write_str("[&")?;
        for (i, (key, value)) in node.annotations().iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_char(']')?;
    }

    if let Some(length) = node.length() {
        write!(f, ":{length}")?;
    }

    Ok(())
}

/// Labels containing delimiters, whitespace or quotes are quoted.
fn write_label(f: &mut fmt::Formatter<'_>, label: &str) -> fmt::Result {
    let needs_quotes = label
        .bytes()
        .any(|b| DELIMITERS.contains(&b) || b.is_ascii_whitespace() || b == b'\'');
    if needs_quotes {
        write!(f, "'{}'", label.replace('\'', "''"))
    } else {
        f.write_str(label)
    }
}
