use crate::i18n::WILDCARD;

/// Converts `items[2].email` style paths into dot notation: `items.2.email`.
///
/// Only bracketed runs of ASCII digits are rewritten. Empty segments are dropped, which collapses
/// repeated dots and trims leading and trailing ones.
pub fn flat_key(path: &str) -> String {
    let mut expanded = String::with_capacity(path.len() + 4);
    let mut rest = path;
    while let Some(open) = rest.find('[') {
        expanded.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after[digits..].starts_with(']') {
            expanded.push('.');
            expanded.push_str(&after[..digits]);
            rest = &after[digits + 1..];
        } else {
            expanded.push('[');
            rest = after;
        }
    }
    expanded.push_str(rest);

    expanded
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// [`flat_key`] with every purely numeric segment replaced by `*`.
pub fn wildcard_key(path: &str) -> String {
    generalize(&flat_key(path))
}

fn generalize(flat: &str) -> String {
    flat.split('.')
        .map(|segment| if is_index(segment) { WILDCARD } else { segment })
        .collect::<Vec<_>>()
        .join(".")
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit())
}

/// Both canonical keys of one field path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PathKeys {
    pub flat: String,
    pub wildcard: String,
}

impl PathKeys {
    pub fn new(path: &str) -> Self {
        let flat = flat_key(path);
        let wildcard = generalize(&flat);
        Self { flat, wildcard }
    }

    pub fn is_indexed(&self) -> bool {
        self.flat != self.wildcard
    }
}
