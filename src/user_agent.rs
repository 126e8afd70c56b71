//! Recursive-descent parser for `User-Agent` values.
//!
//! A user agent is a sequence of product tokens (`name[/version]`) and
//! parenthesised comments, where a comment may itself hold tokens and further
//! comments. Nodes live in a flat arena and refer to their children by index.

use winnow::{
    combinator::{alt, cut_err, eof, fail, opt, preceded, repeat},
    error::StrContext,
    token::{any, none_of, take_while},
    PResult, Parser,
};

use crate::error::{context_label, UserAgentError};

/// Default limit on comment nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Hard ceiling on comment nesting, whatever limit the caller asks for.
/// Parsing recurses once per level, so this bounds stack use.
pub const MAX_UA_DEPTH: usize = 64;

const SEPARATORS: [char; 4] = [' ', '\t', ';', ','];
const PRODUCT_STOP: [char; 6] = [' ', '\t', ';', ',', '(', ')'];

const UNCLOSED: &str = "closing parenthesis";
const TOO_DEEP: &str = "nesting depth";

/// Index of a node inside its [`UserAgentTree`].
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Product {
        name: String,
        version: Option<String>,
    },
    Comment {
        children: Vec<NodeId>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl UserAgentTree {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Top-level nodes in input order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Children of a comment node; empty for products.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id) {
            Some(Node::Comment { children }) => children,
            _ => &[],
        }
    }

    /// Deepest comment nesting in the tree.
    pub fn depth(&self) -> usize {
        fn walk(tree: &UserAgentTree, ids: &[NodeId]) -> usize {
            ids.iter()
                .map(|&id| match tree.nodes.get(id) {
                    Some(Node::Comment { children }) => 1 + walk(tree, children),
                    _ => 0,
                })
                .max()
                .unwrap_or(0)
        }
        walk(self, &self.roots)
    }
}

/// Parse `raw` into a tree. `""` and `"-"` yield an empty tree.
///
/// `max_depth` is clamped to [`MAX_UA_DEPTH`].
pub fn parse_user_agent(raw: &str, max_depth: usize) -> Result<UserAgentTree, UserAgentError> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" {
        return Ok(UserAgentTree::default());
    }

    let max_depth = max_depth.min(MAX_UA_DEPTH);
    let input = &mut (&*raw);
    let items = user_agent(input, max_depth).map_err(|e| match context_label(e) {
        Some(TOO_DEEP) => UserAgentError::MaxDepthExceeded { limit: max_depth },
        _ => UserAgentError::UnbalancedNesting {
            position: raw.len() - input.len(),
        },
    })?;

    let mut tree = UserAgentTree::default();
    tree.roots = tree.insert(items);
    Ok(tree)
}

/// Parser output before it is flattened into the arena.
enum Item {
    Product {
        name: String,
        version: Option<String>,
    },
    Comment(Vec<Item>),
}

impl UserAgentTree {
    fn insert(&mut self, items: Vec<Item>) -> Vec<NodeId> {
        items
            .into_iter()
            .map(|item| {
                let node = match item {
                    Item::Product { name, version } => Node::Product { name, version },
                    Item::Comment(children) => Node::Comment {
                        children: self.insert(children),
                    },
                };
                self.nodes.push(node);
                self.nodes.len() - 1
            })
            .collect()
    }
}

fn user_agent(input: &mut &str, max_depth: usize) -> PResult<Vec<Item>> {
    let roots = items(input, 0, max_depth)?;
    separators(input)?;
    // anything left is a `)` with no matching `(`
    eof(input)?;
    Ok(roots)
}

fn separators<'s>(input: &mut &'s str) -> PResult<&'s str> {
    take_while(0.., SEPARATORS).parse_next(input)
}

/// Siblings at one nesting level, up to end of input or an unmatched `)`.
fn items(input: &mut &str, depth: usize, max_depth: usize) -> PResult<Vec<Item>> {
    repeat(
        0..,
        preceded(
            separators,
            alt((|i: &mut &str| comment(i, depth, max_depth), product)),
        ),
    )
    .parse_next(input)
}

fn comment(input: &mut &str, depth: usize, max_depth: usize) -> PResult<Item> {
    let open = *input;
    '('.parse_next(input)?;
    if depth >= max_depth {
        *input = open;
        return cut_err(fail).context(StrContext::Label(TOO_DEEP)).parse_next(input);
    }

    let children = items(input, depth + 1, max_depth)?;
    separators(input)?;
    if opt(')').parse_next(input)?.is_none() {
        *input = open;
        return cut_err(fail).context(StrContext::Label(UNCLOSED)).parse_next(input);
    }
    Ok(Item::Comment(children))
}

/// `name[/version]`. `\` escapes the next character; the first unescaped `/`
/// splits name from version.
fn product(input: &mut &str) -> PResult<Item> {
    let chars: Vec<(bool, char)> = repeat(
        1..,
        alt((
            preceded('\\', any).map(|c| (true, c)),
            none_of(PRODUCT_STOP).map(|c| (false, c)),
        )),
    )
    .parse_next(input)?;

    let mut name = String::new();
    let mut version: Option<String> = None;
    for (escaped, c) in chars {
        if let Some(v) = version.as_mut() {
            v.push(c);
        } else if c == '/' && !escaped {
            version = Some(String::new());
        } else {
            name.push(c);
        }
    }

    Ok(Item::Product {
        name,
        version: version.filter(|v| !v.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of(tree: &UserAgentTree, id: NodeId) -> &str {
        match tree.node(id) {
            Some(Node::Product { name, .. }) => name,
            other => panic!("expected product, got {other:?}"),
        }
    }

    #[test]
    fn parse_user_agent_should_work() -> anyhow::Result<()> {
        let tree = parse_user_agent(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)",
            DEFAULT_MAX_DEPTH,
        )?;

        let roots = tree.roots();
        assert_eq!(roots.len(), 4);
        assert_eq!(
            tree.node(roots[0]),
            Some(&Node::Product {
                name: "Mozilla".to_string(),
                version: Some("5.0".to_string())
            })
        );
        assert!(matches!(tree.node(roots[1]), Some(Node::Comment { .. })));
        assert_eq!(name_of(&tree, roots[2]), "AppleWebKit");
        assert!(matches!(tree.node(roots[3]), Some(Node::Comment { .. })));

        let first: Vec<_> = tree.children(roots[1]).iter().map(|&id| name_of(&tree, id)).collect();
        assert_eq!(first, ["X11", "Linux", "x86_64"]);
        let second: Vec<_> = tree.children(roots[3]).iter().map(|&id| name_of(&tree, id)).collect();
        assert_eq!(second, ["KHTML", "like", "Gecko"]);
        assert_eq!(tree.depth(), 1);

        Ok(())
    }

    #[test]
    fn parse_nested_comment_should_work() -> anyhow::Result<()> {
        let tree = parse_user_agent(
            "Opera/9.80 (Windows NT 5.1; U; MRA 5.6 (build 03278); ru) Presto/2.6.30 Version/10.63",
            DEFAULT_MAX_DEPTH,
        )?;

        assert_eq!(tree.roots().len(), 4);
        assert_eq!(tree.depth(), 2);
        let comment = tree.children(tree.roots()[1]);
        let nested = comment
            .iter()
            .find(|&&id| matches!(tree.node(id), Some(Node::Comment { .. })))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("nested comment not found"))?;
        assert_eq!(name_of(&tree, tree.children(nested)[0]), "build");

        Ok(())
    }

    #[test]
    fn parse_empty_user_agent_should_work() -> anyhow::Result<()> {
        assert!(parse_user_agent("", DEFAULT_MAX_DEPTH)?.is_empty());
        assert!(parse_user_agent("-", DEFAULT_MAX_DEPTH)?.is_empty());
        assert!(parse_user_agent("  ", DEFAULT_MAX_DEPTH)?.is_empty());
        Ok(())
    }

    #[test]
    fn parse_product_without_version_should_work() -> anyhow::Result<()> {
        let tree = parse_user_agent("Debian APT-HTTP/1.3 ;; en-US", DEFAULT_MAX_DEPTH)?;
        let names: Vec<_> = tree.roots().iter().map(|&id| name_of(&tree, id)).collect();
        assert_eq!(names, ["Debian", "APT-HTTP", "en-US"]);
        assert_eq!(
            tree.node(tree.roots()[0]),
            Some(&Node::Product {
                name: "Debian".to_string(),
                version: None
            })
        );
        Ok(())
    }

    #[test]
    fn parse_escaped_characters_should_work() -> anyhow::Result<()> {
        let tree = parse_user_agent(r"a\/b/1.0\) (c\(d)", DEFAULT_MAX_DEPTH)?;
        assert_eq!(
            tree.node(tree.roots()[0]),
            Some(&Node::Product {
                name: "a/b".to_string(),
                version: Some("1.0)".to_string())
            })
        );
        let inner = tree.children(tree.roots()[1]);
        assert_eq!(name_of(&tree, inner[0]), "c(d");
        Ok(())
    }

    #[test]
    fn parse_unclosed_comment_should_fail() {
        assert_eq!(
            parse_user_agent("Mozilla/5.0 (X11; Linux", DEFAULT_MAX_DEPTH),
            Err(UserAgentError::UnbalancedNesting { position: 12 })
        );
    }

    #[test]
    fn parse_stray_close_should_fail() {
        assert_eq!(
            parse_user_agent("Mozilla/5.0 X11)", DEFAULT_MAX_DEPTH),
            Err(UserAgentError::UnbalancedNesting { position: 15 })
        );
    }

    #[test]
    fn parse_too_deep_should_fail() {
        let deep = format!("{}x{}", "(".repeat(5), ")".repeat(5));
        assert!(parse_user_agent(&deep, 5).is_ok());
        assert_eq!(
            parse_user_agent(&deep, 4),
            Err(UserAgentError::MaxDepthExceeded { limit: 4 })
        );

        let pathological = "(".repeat(100_000);
        assert_eq!(
            parse_user_agent(&pathological, DEFAULT_MAX_DEPTH),
            Err(UserAgentError::MaxDepthExceeded {
                limit: DEFAULT_MAX_DEPTH
            })
        );
    }

    #[test]
    fn parse_depth_limit_is_clamped() -> anyhow::Result<()> {
        // a small stack, like a worker thread's, must survive the largest limit
        let handle = std::thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(|| {
                let deepest = format!("{}x{}", "(".repeat(MAX_UA_DEPTH), ")".repeat(MAX_UA_DEPTH));
                let tree = parse_user_agent(&deepest, usize::MAX).map(|t| t.depth());

                let huge = "(".repeat(5000);
                let rejected = parse_user_agent(&huge, 5001);
                (tree, rejected)
            })?;
        let (tree, rejected) = handle
            .join()
            .map_err(|_| anyhow::anyhow!("parser thread panicked"))?;

        assert_eq!(tree, Ok(MAX_UA_DEPTH));
        assert_eq!(
            rejected,
            Err(UserAgentError::MaxDepthExceeded {
                limit: MAX_UA_DEPTH
            })
        );
        Ok(())
    }
}
