use crate::dom::{DomElement, nth_of_type};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Locator returned for the document's root body element.
pub const ROOT_MARKER: &str = "body";

/// Separator between per-level segments of a structural path.
pub const PATH_SEPARATOR: &str = " > ";

/// Locator convention. Fixed per recorder: replay assumes every selector in
/// a session follows the same one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    /// `#id`, else `body`, else a `tag:nth-of-type(k)` path below the body.
    #[default]
    Structural,
    /// `#id`, else `[name="…"]`, else `.class.list`, else the bare tag.
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Element has no tag name")]
    MissingTagName,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorResolver {
    strategy: SelectorStrategy,
}

impl SelectorResolver {
    pub fn new(strategy: SelectorStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SelectorStrategy {
        self.strategy
    }

    pub fn resolve<E: DomElement>(&self, element: &E) -> Result<String, ResolveError> {
        if element.tag_name().is_empty() {
            return Err(ResolveError::MissingTagName);
        }
        Ok(match self.strategy {
            SelectorStrategy::Structural => structural_selector(element),
            SelectorStrategy::Attribute => attribute_selector(element),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn structural_selector<E: DomElement>(element: &E) -> String {
    if let Some(id) = non_empty(element.attribute("id")) {
        return format!("#{}", id);
    }
    if element.is_root_body() {
        return ROOT_MARKER.to_string();
    }

    let mut path = vec![segment(element)];
    let mut cur = element.parent_element();
    while let Some(el) = cur {
        if el.is_root_body() {
            break;
        }
        path.push(segment(&el));
        cur = el.parent_element();
    }
    path.reverse();
    path.join(PATH_SEPARATOR)
}

fn segment<E: DomElement>(element: &E) -> String {
    format!("{}:nth-of-type({})", element.tag_name(), nth_of_type(element))
}

pub fn attribute_selector<E: DomElement>(element: &E) -> String {
    if let Some(id) = non_empty(element.attribute("id")) {
        return format!("#{}", id);
    }
    if let Some(name) = non_empty(element.attribute("name")) {
        return format!("[name=\"{}\"]", name);
    }
    if let Some(class) = non_empty(element.attribute("class")) {
        let classes: Vec<&str> = class.split_whitespace().collect();
        return format!(".{}", classes.join("."));
    }
    element.tag_name()
}
