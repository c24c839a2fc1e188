//! CSS selector subset used by [`super::MemoryPage`]: type and universal
//! selectors, `#id`, `.class`, attribute conditions (`[a]`, `[a=v]`,
//! `[a~=v]`, `[a*=v]`, `[a^=v]`, `[a$=v]`), descendant and child combinators,
//! and comma-separated groups. Anything else is rejected as invalid.

use crate::error::PageError;

/// Read access to an element tree, addressed by node index.
pub(crate) trait ElementTree {
    /// Tag name for element nodes, `None` for the document root.
    fn tag(&self, node: usize) -> Option<&str>;
    fn attr(&self, node: usize, name: &str) -> Option<&str>;
    fn parent(&self, node: usize) -> Option<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrCondition {
    Exists(String),
    Eq(String, String),
    Includes(String, String),
    Contains(String, String),
    StartsWith(String, String),
    EndsWith(String, String),
}

impl AttrCondition {
    fn matches(&self, tree: &dyn ElementTree, node: usize) -> bool {
        match self {
            AttrCondition::Exists(key) => tree.attr(node, key).is_some(),
            AttrCondition::Eq(key, value) => tree.attr(node, key) == Some(value.as_str()),
            AttrCondition::Includes(key, value) => tree
                .attr(node, key)
                .is_some_and(|v| v.split_whitespace().any(|token| token == value)),
            AttrCondition::Contains(key, value) => {
                !value.is_empty() && tree.attr(node, key).is_some_and(|v| v.contains(value.as_str()))
            }
            AttrCondition::StartsWith(key, value) => {
                !value.is_empty()
                    && tree.attr(node, key).is_some_and(|v| v.starts_with(value.as_str()))
            }
            AttrCondition::EndsWith(key, value) => {
                !value.is_empty() && tree.attr(node, key).is_some_and(|v| v.ends_with(value.as_str()))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    universal: bool,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCondition>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
    }

    fn matches(&self, tree: &dyn ElementTree, node: usize) -> bool {
        let Some(tag) = tree.tag(node) else {
            return false;
        };
        if let Some(expected) = &self.tag {
            if !tag.eq_ignore_ascii_case(expected) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if tree.attr(node, "id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = tree.attr(node, "class").unwrap_or_default();
            if !self
                .classes
                .iter()
                .all(|class| class_attr.split_whitespace().any(|c| c == class))
            {
                return false;
            }
        }
        self.attrs.iter().all(|cond| cond.matches(tree, node))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Part {
    compound: Compound,
    // Relation to the part on the left; `None` for the first part.
    combinator: Option<Combinator>,
}

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorList {
    groups: Vec<Vec<Part>>,
}

impl SelectorList {
    pub(crate) fn parse(selector: &str) -> Result<Self, PageError> {
        let invalid = || PageError::InvalidSelector(selector.to_string());
        let groups = split_groups(selector)
            .into_iter()
            .map(|group| parse_chain(group).ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()?;
        if groups.is_empty() {
            return Err(invalid());
        }
        Ok(Self { groups })
    }

    pub(crate) fn matches(&self, tree: &dyn ElementTree, node: usize) -> bool {
        self.groups
            .iter()
            .any(|parts| matches_from(tree, parts, parts.len() - 1, node))
    }

    /// `#id` alone, which callers can answer from an id index.
    pub(crate) fn id_only(&self) -> Option<&str> {
        match self.groups.as_slice() {
            [parts] if parts.len() == 1 => {
                let compound = &parts[0].compound;
                let only_id = !compound.universal
                    && compound.tag.is_none()
                    && compound.classes.is_empty()
                    && compound.attrs.is_empty();
                if only_id { compound.id.as_deref() } else { None }
            }
            _ => None,
        }
    }
}

fn matches_from(tree: &dyn ElementTree, parts: &[Part], idx: usize, node: usize) -> bool {
    if !parts[idx].compound.matches(tree, node) {
        return false;
    }
    if idx == 0 {
        return true;
    }
    match parts[idx].combinator.unwrap_or(Combinator::Descendant) {
        Combinator::Child => tree
            .parent(node)
            .is_some_and(|parent| matches_from(tree, parts, idx - 1, parent)),
        Combinator::Descendant => {
            let mut cursor = tree.parent(node);
            while let Some(ancestor) = cursor {
                if matches_from(tree, parts, idx - 1, ancestor) {
                    return true;
                }
                cursor = tree.parent(ancestor);
            }
            false
        }
    }
}

/// Splits on commas outside brackets and quotes.
fn split_groups(selector: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in selector.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                groups.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&selector[start..]);
    groups
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) -> bool {
        let mut skipped = false;
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
            skipped = true;
        }
        skipped
    }

    fn ident(&mut self) -> Option<String> {
        let mut out = String::new();
        while let Some(ch) = self.peek().filter(|c| is_ident_char(*c)) {
            out.push(ch);
            self.bump();
        }
        (!out.is_empty()).then_some(out)
    }

    fn attr_value(&mut self) -> Option<String> {
        match self.peek()? {
            q @ ('"' | '\'') => {
                self.bump();
                let mut out = String::new();
                loop {
                    match self.bump()? {
                        c if c == q => return Some(out),
                        c => out.push(c),
                    }
                }
            }
            _ => self.ident(),
        }
    }

    fn attr_condition(&mut self) -> Option<AttrCondition> {
        self.skip_ws();
        let key = self.ident()?;
        self.skip_ws();
        if self.eat(']') {
            return Some(AttrCondition::Exists(key));
        }
        let op = match self.bump()? {
            '=' => None,
            c @ ('~' | '*' | '^' | '$') => {
                if !self.eat('=') {
                    return None;
                }
                Some(c)
            }
            _ => return None,
        };
        self.skip_ws();
        let value = self.attr_value()?;
        self.skip_ws();
        if !self.eat(']') {
            return None;
        }
        Some(match op {
            None => AttrCondition::Eq(key, value),
            Some('~') => AttrCondition::Includes(key, value),
            Some('*') => AttrCondition::Contains(key, value),
            Some('^') => AttrCondition::StartsWith(key, value),
            Some(_) => AttrCondition::EndsWith(key, value),
        })
    }
}

fn parse_chain(src: &str) -> Option<Vec<Part>> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }

    let mut cursor = Cursor::new(src);
    let mut parts: Vec<Part> = Vec::new();
    let mut current = Compound::default();
    let mut pending: Option<Combinator> = None;

    fn flush(parts: &mut Vec<Part>, current: &mut Compound, pending: &mut Option<Combinator>) {
        if current.is_empty() {
            return;
        }
        let combinator = if parts.is_empty() {
            None
        } else {
            Some(pending.take().unwrap_or(Combinator::Descendant))
        };
        parts.push(Part {
            compound: std::mem::take(current),
            combinator,
        });
        *pending = None;
    }

    while let Some(ch) = cursor.peek() {
        match ch {
            c if c.is_whitespace() => {
                cursor.skip_ws();
                if !current.is_empty() {
                    flush(&mut parts, &mut current, &mut pending);
                    pending = Some(Combinator::Descendant);
                }
            }
            '>' => {
                cursor.bump();
                flush(&mut parts, &mut current, &mut pending);
                if parts.is_empty() {
                    return None;
                }
                pending = Some(Combinator::Child);
            }
            '#' => {
                cursor.bump();
                current.id = Some(cursor.ident()?);
            }
            '.' => {
                cursor.bump();
                current.classes.push(cursor.ident()?);
            }
            '[' => {
                cursor.bump();
                current.attrs.push(cursor.attr_condition()?);
            }
            '*' => {
                if !current.is_empty() {
                    return None;
                }
                cursor.bump();
                current.universal = true;
            }
            c if is_ident_char(c) && !c.is_ascii_digit() => {
                if !current.is_empty() {
                    return None;
                }
                current.tag = Some(cursor.ident()?.to_ascii_lowercase());
            }
            _ => return None,
        }
    }

    if current.is_empty() {
        // trailing combinator such as "div >"
        if pending == Some(Combinator::Child) {
            return None;
        }
    } else {
        flush(&mut parts, &mut current, &mut pending);
    }

    (!parts.is_empty()).then_some(parts)
}
