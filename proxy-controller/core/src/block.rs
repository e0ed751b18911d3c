/// A single Caddyfile node: a site, a directive or a sub-directive.
///
/// The first key is conventionally the directive (or site) name and the
/// remaining keys are its arguments. A block without keys is a global
/// options block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub keys: Vec<String>,

    /// Explicit position among siblings. Blocks without an explicit position
    /// use [`Block::NATURAL_ORDER`] and sort after every ordered sibling.
    pub order: i32,

    pub children: Container,
}

/// An ordered collection of sibling blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Container {
    pub children: Vec<Block>,
}

// === impl Block ===

impl Default for Block {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            order: Self::NATURAL_ORDER,
            children: Container::default(),
        }
    }
}

impl Block {
    pub const NATURAL_ORDER: i32 = i32::MAX;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut block = Self::new();
        block.add_keys(keys);
        block
    }

    pub fn add_keys<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
    }

    pub fn add_block(&mut self, block: Block) {
        self.children.add_block(block);
    }

    /// Returns the directive name, or an empty string for global blocks.
    pub fn first_key(&self) -> &str {
        self.keys.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_global_block(&self) -> bool {
        self.keys.is_empty()
    }

    /// A snippet is a block named `(name)` that other blocks import.
    pub fn is_snippet(&self) -> bool {
        match self.keys.as_slice() {
            [key] => key.len() >= 2 && key.starts_with('(') && key.ends_with(')'),
            _ => false,
        }
    }
}

// === impl Container ===

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block: Block) {
        self.children.push(block);
    }

    pub fn get_all_by_first_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Block> {
        self.children.iter().filter(move |b| b.first_key() == key)
    }

    /// Removes the child at `index`, which identifies it among its siblings.
    pub fn remove(&mut self, index: usize) -> Block {
        self.children.remove(index)
    }

    /// Moves every child matching `predicate` into a new container,
    /// preserving relative order on both sides.
    pub fn extract_if(&mut self, mut predicate: impl FnMut(&Block) -> bool) -> Container {
        let (extracted, remaining) = std::mem::take(&mut self.children)
            .into_iter()
            .partition(|b| predicate(b));
        self.children = remaining;
        Container {
            children: extracted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.children.iter()
    }
}

impl FromIterator<Block> for Container {
    fn from_iter<T: IntoIterator<Item = Block>>(iter: T) -> Self {
        Self {
            children: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Container {
    type Item = Block;
    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.children.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(Block::new().is_global_block());
        assert!(!Block::with_keys(["localhost"]).is_global_block());

        assert!(Block::with_keys(["(snippet)"]).is_snippet());
        assert!(!Block::with_keys(["(snippet)", "arg"]).is_snippet());
        assert!(!Block::with_keys(["()x"]).is_snippet());
        assert!(!Block::with_keys(["("]).is_snippet());
    }

    #[test]
    fn first_key_of_global_block_is_empty() {
        assert_eq!(Block::new().first_key(), "");
        assert_eq!(
            Block::with_keys(["reverse_proxy", "a:80"]).first_key(),
            "reverse_proxy"
        );
    }

    #[test]
    fn extract_preserves_order() {
        let mut container: Container = [
            Block::with_keys(["a"]),
            Block::new(),
            Block::with_keys(["b"]),
            Block::new(),
        ]
        .into_iter()
        .collect();
        let globals = container.extract_if(Block::is_global_block);
        assert_eq!(globals.len(), 2);
        assert_eq!(
            container.iter().map(Block::first_key).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn get_all_by_first_key() {
        let mut container = Container::new();
        container.add_block(Block::with_keys(["route", "/a"]));
        container.add_block(Block::with_keys(["tls", "internal"]));
        container.add_block(Block::with_keys(["route", "/b"]));
        let routes = container
            .get_all_by_first_key("route")
            .map(|b| b.keys[1].as_str())
            .collect::<Vec<_>>();
        assert_eq!(routes, vec!["/a", "/b"]);

        let removed = container.remove(1);
        assert_eq!(removed.first_key(), "tls");
        assert_eq!(container.len(), 2);
    }
}
