use crate::{Block, Container};

/// Directives whose arguments are upstream addresses. Blocks of these
/// directives that apply to the same requests are combined into a single
/// directive listing every upstream.
const PROXY_LIKE: &[&str] = &["reverse_proxy", "php_fastcgi"];

impl Container {
    /// Merges every block of `other` into this container.
    ///
    /// A block is combined with the first existing sibling that shares its
    /// directive name and either is a proxy-like directive with the same
    /// matcher, or has exactly the same keys. Otherwise it is appended.
    pub fn merge(&mut self, other: Container) {
        for block in other.children {
            let existing = self
                .children
                .iter()
                .position(|b| b.first_key() == block.first_key() && can_merge(b, &block));
            match existing {
                Some(i) => {
                    let target = &mut self.children[i];
                    if is_proxy_like(&block) && matcher(target) == matcher(&block) {
                        merge_proxy_like(target, block);
                    } else {
                        target.children.merge(block.children);
                    }
                }
                None => self.children.push(block),
            }
        }
    }
}

fn can_merge(a: &Block, b: &Block) -> bool {
    (is_proxy_like(b) && matcher(a) == matcher(b)) || a.keys == b.keys
}

fn is_proxy_like(block: &Block) -> bool {
    PROXY_LIKE.contains(&block.first_key())
}

fn merge_proxy_like(target: &mut Block, block: Block) {
    let Block { keys, children, .. } = block;
    for (i, key) in keys.into_iter().skip(1).enumerate() {
        // The matcher is already present on the target.
        if i == 0 && is_matcher(&key) {
            continue;
        }
        target.keys.push(key);
    }
    target.children.merge(children);
}

/// The request matcher a directive applies to: its first argument if that
/// looks like a matcher, otherwise the wildcard.
fn matcher(block: &Block) -> &str {
    match block.keys.get(1) {
        Some(key) if is_matcher(key) => key,
        _ => "*",
    }
}

fn is_matcher(key: &str) -> bool {
    key == "*" || key.starts_with('/') || key.starts_with('@')
}
