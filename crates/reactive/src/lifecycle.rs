//! Lifecycle phase tags.
//!
//! The engine does not interpret phases. A binding layer forwards opaque tags
//! through [`Instance::lifecycle`](crate::Instance::lifecycle), and handlers
//! registered under the same name run. These constants name the tags the
//! engine itself forwards and the ones binding layers conventionally use.

use alloc::string::String;

pub const DID_CREATE: &str = "didCreate";
pub const WILL_DESTROY: &str = "willDestroy";
pub const WILL_RENDER: &str = "willRender";
pub const WILL_UPDATE: &str = "willUpdate";
pub const WILL_MOUNT: &str = "willMount";
pub const WILL_UNMOUNT: &str = "willUnmount";
pub const DID_MOUNT: &str = "didMount";
pub const DID_RENDER: &str = "didRender";
pub const WILL_RESET: &str = "willReset";

/// Prefix for element-scoped aliases.
pub const ELEMENT: &str = "element";
/// Prefix for component-scoped aliases.
pub const COMPONENT: &str = "component";

/// Phases a binding layer drives; these are the ones that get aliases.
pub const PHASES: [&str; 7] = [
    WILL_RENDER,
    WILL_UPDATE,
    WILL_MOUNT,
    WILL_UNMOUNT,
    DID_MOUNT,
    DID_RENDER,
    WILL_RESET,
];

/// Builds a prefixed alias: `alias("element", "willMount")` is
/// `"elementWillMount"`.
pub fn alias(prefix: &str, tag: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + tag.len());
    out.push_str(prefix);
    let mut chars = tag.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(chars.as_str());
    }
    out
}

/// Returns true for a known tag or one of its prefixed aliases.
pub fn is_known(tag: &str) -> bool {
    if tag == DID_CREATE || tag == WILL_DESTROY || PHASES.contains(&tag) {
        return true;
    }
    [ELEMENT, COMPONENT].iter().any(|prefix| {
        PHASES
            .iter()
            .any(|phase| tag.strip_prefix(*prefix).is_some_and(|rest| matches_capitalized(rest, phase)))
    })
}

fn matches_capitalized(rest: &str, phase: &str) -> bool {
    let mut a = rest.chars();
    let mut b = phase.chars();
    match (a.next(), b.next()) {
        (Some(x), Some(y)) => x == y.to_ascii_uppercase() && a.as_str() == b.as_str(),
        _ => false,
    }
}
