//! 数据节点路径
//!
//! 支持的路径格式：`/module-name:container/list[key='value']/leaf`。
//! 通配形式 `/module-name:*` 表示模块的全部顶层节点，只能用于过滤器和删除。
//!
//! [`XPath`] 的排序即文档顺序（先序遍历）：父节点排在所有后代之前，
//! 兄弟节点先按节点名、再按列表键排序。

use crate::errors::{DatastoreError, DatastoreResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// 路径中的一个节点
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    /// 模块前缀，只在进入新模块时出现
    pub prefix: Option<String>,
    /// 节点名
    pub name: String,
    /// 列表键谓词，保持书写顺序
    pub keys: Vec<(String, String)>,
}

impl PathSegment {
    /// 创建节点
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            name: name.into(),
            keys: Vec::new(),
        }
    }

    /// 设置模块前缀
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// 添加列表键
    pub fn with_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.push((key.into(), value.into()));
        self
    }
}

impl Ord for PathSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix
            .cmp(&other.prefix)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.keys.cmp(&other.keys))
    }
}

impl PartialOrd for PathSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, "{prefix}:")?;
        }
        f.write_str(&self.name)?;
        for (key, value) in &self.keys {
            if value.contains('\'') {
                write!(f, "[{key}=\"{value}\"]")?;
            } else {
                write!(f, "[{key}='{value}']")?;
            }
        }
        Ok(())
    }
}

/// 已解析的绝对数据路径
///
/// 相等和排序基于规范化后的节点序列，与书写时的冗余前缀无关。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct XPath {
    segments: Vec<PathSegment>,
}

impl XPath {
    /// 解析路径
    pub fn parse(input: &str) -> DatastoreResult<Self> {
        let segments = Parser::new(input).parse_segments()?;
        if segments.iter().any(|s| s.name == "*") {
            return Err(DatastoreError::invalid_path(
                input,
                "通配符只能用于过滤器或删除",
            ));
        }
        Self::from_segments(segments).map_err(|reason| DatastoreError::invalid_path(input, reason))
    }

    /// 从节点序列构造路径并规范化模块前缀
    pub fn from_segments(segments: Vec<PathSegment>) -> Result<Self, String> {
        let mut iter = segments.into_iter();
        let first = iter.next().ok_or_else(|| "路径为空".to_string())?;
        let mut module = first
            .prefix
            .clone()
            .ok_or_else(|| "顶层节点必须带模块前缀".to_string())?;

        let mut normalized = vec![first];
        for mut segment in iter {
            match segment.prefix.take() {
                Some(prefix) if prefix != module => {
                    module = prefix.clone();
                    segment.prefix = Some(prefix);
                }
                _ => {}
            }
            normalized.push(segment);
        }

        Ok(Self {
            segments: normalized,
        })
    }

    /// 所属模块名（顶层节点的前缀）
    pub fn module(&self) -> &str {
        self.segments[0].prefix.as_deref().unwrap_or_default()
    }

    /// 节点序列
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// 路径深度，顶层节点为 1
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// 是否为顶层节点
    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }

    /// 最后一个节点名
    pub fn leaf_name(&self) -> &str {
        &self.segments[self.segments.len() - 1].name
    }

    /// 父节点路径，顶层节点没有父节点
    pub fn parent(&self) -> Option<Self> {
        if self.is_top_level() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// 创建子节点路径
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        // 前缀规范化只可能去掉冗余前缀，不会失败
        Self::from_segments(segments).unwrap_or_else(|_| self.clone())
    }

    /// 去掉列表键谓词后的模式路径，例如 `/m:x[name='a']/number` 对应 `/m:x/number`
    pub fn schema_path(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            if let Some(prefix) = &segment.prefix {
                out.push_str(prefix);
                out.push(':');
            }
            out.push_str(&segment.name);
        }
        out
    }

    /// 是否为 `other` 的严格祖先
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// 是否为 `other` 本身或其祖先
    pub fn is_ancestor_or_self(&self, other: &Self) -> bool {
        self == other || self.is_ancestor_of(other)
    }
}

impl Ord for XPath {
    fn cmp(&self, other: &Self) -> Ordering {
        // 逐节点比较，前缀相同时较短者（祖先）在前，即先序遍历顺序
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for XPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for XPath {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for XPath {
    type Error = DatastoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<XPath> for String {
    fn from(path: XPath) -> Self {
        path.to_string()
    }
}

/// 路径过滤器
///
/// 用于订阅过滤、变更迭代和通配删除。过滤器与路径"相交"的含义是：
/// 路径位于过滤器覆盖的子树内，或者路径是该子树根的祖先（删除祖先会影响子树）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum XPathFilter {
    /// `/module:*`，模块的全部数据
    Module(String),
    /// `/module:a/b`，节点自身及其子树
    Subtree(XPath),
    /// `/module:a/b/*`，节点的全部后代，不含节点自身
    Children(XPath),
}

impl XPathFilter {
    /// 解析过滤器
    pub fn parse(input: &str) -> DatastoreResult<Self> {
        let trimmed = input.trim();
        let normalized = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };

        let mut segments = Parser::new(&normalized).parse_segments()?;
        let last = segments.len() - 1;
        if segments[..last].iter().any(|s| s.name == "*") {
            return Err(DatastoreError::invalid_path(input, "通配符只能出现在末尾"));
        }

        if segments[last].name != "*" {
            let path = XPath::from_segments(segments)
                .map_err(|reason| DatastoreError::invalid_path(input, reason))?;
            return Ok(Self::Subtree(path));
        }

        let wildcard = segments.pop().unwrap_or_else(|| PathSegment::new("*"));
        if !wildcard.keys.is_empty() {
            return Err(DatastoreError::invalid_path(input, "通配符不能带谓词"));
        }

        if segments.is_empty() {
            let module = wildcard
                .prefix
                .ok_or_else(|| DatastoreError::invalid_path(input, "模块通配必须带模块前缀"))?;
            return Ok(Self::Module(module));
        }

        let path = XPath::from_segments(segments)
            .map_err(|reason| DatastoreError::invalid_path(input, reason))?;
        Ok(Self::Children(path))
    }

    /// 整个模块的过滤器
    pub fn module(module: impl Into<String>) -> Self {
        Self::Module(module.into())
    }

    /// 过滤器所属模块
    pub fn module_name(&self) -> &str {
        match self {
            Self::Module(module) => module,
            Self::Subtree(path) | Self::Children(path) => path.module(),
        }
    }

    /// 是否为模块通配
    pub fn is_module_wildcard(&self) -> bool {
        matches!(self, Self::Module(_))
    }

    /// 过滤器是否与路径相交
    pub fn matches(&self, path: &XPath) -> bool {
        match self {
            Self::Module(module) => path.module() == module,
            Self::Subtree(root) => root.is_ancestor_or_self(path) || path.is_ancestor_of(root),
            Self::Children(root) => root.is_ancestor_of(path) || path.is_ancestor_or_self(root),
        }
    }

    /// 路径是否被过滤器完全覆盖（用于删除：只删除覆盖范围内的节点）
    pub fn covers(&self, path: &XPath) -> bool {
        match self {
            Self::Module(module) => path.module() == module,
            Self::Subtree(root) => root.is_ancestor_or_self(path),
            Self::Children(root) => root.is_ancestor_of(path),
        }
    }
}

impl fmt::Display for XPathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(module) => write!(f, "/{module}:*"),
            Self::Subtree(path) => write!(f, "{path}"),
            Self::Children(path) => write!(f, "{path}/*"),
        }
    }
}

impl FromStr for XPathFilter {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// 路径文本解析器
struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> DatastoreError {
        DatastoreError::invalid_path(self.input, reason)
    }

    fn parse_segments(&mut self) -> DatastoreResult<Vec<PathSegment>> {
        let mut segments = Vec::new();

        if self.chars.peek().map(|(_, c)| *c) != Some('/') {
            return Err(self.error("路径必须以 '/' 开头"));
        }

        while let Some((_, c)) = self.chars.next() {
            if c != '/' {
                return Err(self.error(format!("意外的字符 '{c}'")));
            }
            segments.push(self.parse_segment()?);
        }

        if segments.is_empty() {
            return Err(self.error("路径为空"));
        }
        if segments[0].prefix.is_none() {
            return Err(self.error("顶层节点必须带模块前缀"));
        }
        Ok(segments)
    }

    fn parse_segment(&mut self) -> DatastoreResult<PathSegment> {
        let first = self.parse_identifier()?;
        let mut segment = if self.chars.peek().map(|(_, c)| *c) == Some(':') {
            self.chars.next();
            if first == "*" {
                return Err(self.error("模块前缀不能是通配符"));
            }
            PathSegment::new(self.parse_identifier()?).with_prefix(first)
        } else {
            PathSegment::new(first)
        };

        while self.chars.peek().map(|(_, c)| *c) == Some('[') {
            self.chars.next();
            let key = self.parse_identifier()?;
            if key == "*" {
                return Err(self.error("谓词键不能是通配符"));
            }
            self.expect('=')?;
            let value = self.parse_quoted()?;
            self.expect(']')?;
            segment.keys.push((key, value));
        }

        Ok(segment)
    }

    fn parse_identifier(&mut self) -> DatastoreResult<String> {
        if self.chars.peek().map(|(_, c)| *c) == Some('*') {
            self.chars.next();
            return Ok("*".to_string());
        }

        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            let valid = if ident.is_empty() {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
            };
            if !valid {
                break;
            }
            ident.push(c);
            self.chars.next();
        }

        if ident.is_empty() {
            return Err(self.error("缺少节点名"));
        }
        Ok(ident)
    }

    fn parse_quoted(&mut self) -> DatastoreResult<String> {
        let quote = match self.chars.next() {
            Some((_, c @ ('\'' | '"'))) => c,
            _ => return Err(self.error("谓词值必须加引号")),
        };

        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(value),
                Some((_, c)) => value.push(c),
                None => return Err(self.error("谓词值引号未闭合")),
            }
        }
    }

    fn expect(&mut self, expected: char) -> DatastoreResult<()> {
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((pos, c)) => Err(self.error(format!("位置 {pos} 期望 '{expected}'，实际 '{c}'"))),
            None => Err(self.error(format!("期望 '{expected}'，路径已结束"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xp(s: &str) -> XPath {
        XPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_list_path() {
        let path = xp("/swig-test:cpp-changes/test-get[name='test-cpp-10']/number");
        assert_eq!(path.module(), "swig-test");
        assert_eq!(path.depth(), 3);
        assert_eq!(path.leaf_name(), "number");
        assert_eq!(
            path.segments()[1].keys,
            vec![("name".to_string(), "test-cpp-10".to_string())]
        );
        assert_eq!(
            path.to_string(),
            "/swig-test:cpp-changes/test-get[name='test-cpp-10']/number"
        );
    }

    #[test]
    fn test_redundant_prefix_is_normalized() {
        assert_eq!(xp("/m:a/m:b"), xp("/m:a/b"));
        assert_eq!(xp("/m:a/m:b").to_string(), "/m:a/b");
        // 进入其他模块的前缀需要保留
        assert_eq!(xp("/m:a/aug:b").to_string(), "/m:a/aug:b");
    }

    #[test]
    fn test_quoted_values_may_contain_separators() {
        let path = xp("/m:x[name=\"a/b]'c\"]/leaf");
        assert_eq!(path.segments()[0].keys[0].1, "a/b]'c");
        assert_eq!(xp(&path.to_string()), path);
    }

    #[test]
    fn test_invalid_paths() {
        for input in [
            "",
            "m:x",
            "/x",
            "/m:",
            "/m:x[name=a]",
            "/m:x[name='a'",
            "/m:x//y",
            "/m:*",
            "/m:x/*",
        ] {
            assert!(
                matches!(XPath::parse(input), Err(DatastoreError::InvalidPath { .. })),
                "应该拒绝 {input:?}"
            );
        }
    }

    #[test]
    fn test_document_order_is_preorder() {
        let mut paths = vec![
            xp("/m:a-x"),
            xp("/m:a/b"),
            xp("/m:a"),
            xp("/m:a/b/c"),
            xp("/m:a/a"),
        ];
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["/m:a", "/m:a/a", "/m:a/b", "/m:a/b/c", "/m:a-x"]);
    }

    #[test]
    fn test_list_entries_order_by_key() {
        let a = xp("/m:x[name='a']/number");
        let b = xp("/m:x[name='b']");
        let a_entry = xp("/m:x[name='a']");
        assert!(a_entry < a);
        assert!(a < b);
    }

    #[test]
    fn test_schema_path_drops_predicates() {
        assert_eq!(
            xp("/m:x[name='a']/aug:y[k='1'][j='2']/leaf").schema_path(),
            "/m:x/aug:y/leaf"
        );
    }

    #[test]
    fn test_ancestry() {
        let parent = xp("/m:x[name='a']");
        let child = xp("/m:x[name='a']/number");
        assert!(parent.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&parent));
        assert!(!parent.is_ancestor_of(&parent));
        assert_eq!(child.parent(), Some(parent.clone()));
        assert_eq!(parent.parent(), None);
        assert_eq!(parent.child(PathSegment::new("number")), child);
    }

    #[test]
    fn test_filters() {
        let leaf = xp("/m:x[name='a']/number");
        let entry = xp("/m:x[name='a']");

        let module = XPathFilter::parse("/m:*").unwrap();
        assert_eq!(module, XPathFilter::module("m"));
        assert!(module.matches(&leaf));
        assert!(!module.matches(&xp("/other:x")));
        assert_eq!(XPathFilter::parse("m:*").unwrap(), module);

        let subtree = XPathFilter::parse("/m:x[name='a']").unwrap();
        assert!(subtree.matches(&leaf));
        assert!(subtree.covers(&entry));
        assert!(!subtree.matches(&xp("/m:x[name='b']/number")));

        let children = XPathFilter::parse("/m:x[name='a']/*").unwrap();
        assert!(children.matches(&leaf));
        assert!(children.covers(&leaf));
        assert!(!children.covers(&entry));

        // 祖先节点的变更与子树过滤器相交
        let leaf_filter = XPathFilter::parse("/m:x[name='a']/number").unwrap();
        assert!(leaf_filter.matches(&entry));
        assert!(!leaf_filter.covers(&entry));
    }

    #[test]
    fn test_filter_rejects_inner_wildcard() {
        assert!(XPathFilter::parse("/m:*/x").is_err());
        assert!(XPathFilter::parse("/*").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let path = xp("/m:x[name='a']/number");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/m:x[name='a']/number\"");
        let back: XPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
