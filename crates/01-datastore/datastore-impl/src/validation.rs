//! 基于规则的模式验证器实现

use datastore_abstractions::SchemaValidator;
use datastore_common::{ConfigTree, DatastoreError, DatastoreResult, Value, ValueType, XPath};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// 节点值验证规则
pub trait ValueRule: Send + Sync {
    /// 检查节点值，失败返回原因
    fn check(&self, value: &Value) -> Result<(), String>;

    /// 获取规则名称
    fn name(&self) -> &str;
}

/// 类型标签规则
pub struct TypeRule {
    allowed: Vec<ValueType>,
}

impl TypeRule {
    /// 允许多个类型标签
    pub fn new(allowed: impl IntoIterator<Item = ValueType>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// 只允许一个类型标签
    pub fn only(value_type: ValueType) -> Self {
        Self::new([value_type])
    }
}

impl ValueRule for TypeRule {
    fn check(&self, value: &Value) -> Result<(), String> {
        let actual = value.value_type();
        if self.allowed.contains(&actual) {
            return Ok(());
        }
        let expected: Vec<&str> = self.allowed.iter().map(|t| t.as_str()).collect();
        Err(format!("类型 {} 不在允许范围内 [{}]", actual, expected.join(", ")))
    }

    fn name(&self) -> &str {
        "TypeRule"
    }
}

/// 数值范围规则
pub struct RangeRule {
    min: Option<f64>,
    max: Option<f64>,
}

impl RangeRule {
    /// 可选的上下界，包含边界
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// 只有下界
    pub fn min_value(min: f64) -> Self {
        Self::new(Some(min), None)
    }

    /// 只有上界
    pub fn max_value(max: f64) -> Self {
        Self::new(None, Some(max))
    }

    /// 闭区间 `[min, max]`
    pub fn between(min: f64, max: f64) -> Self {
        Self::new(Some(min), Some(max))
    }
}

impl ValueRule for RangeRule {
    fn check(&self, value: &Value) -> Result<(), String> {
        let Some(num) = value.as_f64() else {
            return Err(format!("值 {} 不是数字类型", value));
        };

        if let Some(min) = self.min {
            if num < min {
                return Err(format!("值必须大于等于 {}", min));
            }
        }
        if let Some(max) = self.max {
            if num > max {
                return Err(format!("值必须小于等于 {}", max));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "RangeRule"
    }
}

/// 字符串长度规则
pub struct StringLengthRule {
    min_length: Option<usize>,
    max_length: Option<usize>,
}

impl StringLengthRule {
    /// 可选的字符数上下界
    pub fn new(min_length: Option<usize>, max_length: Option<usize>) -> Self {
        Self {
            min_length,
            max_length,
        }
    }

    /// 字符数在 `[min, max]` 内
    pub fn length_range(min: usize, max: usize) -> Self {
        Self::new(Some(min), Some(max))
    }
}

impl ValueRule for StringLengthRule {
    fn check(&self, value: &Value) -> Result<(), String> {
        let Some(s) = value.as_str() else {
            return Err(format!("值 {} 不是字符串类型", value));
        };

        let length = s.chars().count();
        if let Some(min) = self.min_length {
            if length < min {
                return Err(format!("字符串长度必须大于等于 {}", min));
            }
        }
        if let Some(max) = self.max_length {
            if length > max {
                return Err(format!("字符串长度必须小于等于 {}", max));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "StringLengthRule"
    }
}

/// 正则表达式规则
pub struct RegexRule {
    pattern: regex::Regex,
}

impl RegexRule {
    /// 模式自动锚定到整个字符串
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: regex::Regex::new(&format!("^(?:{})$", pattern))?,
        })
    }
}

impl ValueRule for RegexRule {
    fn check(&self, value: &Value) -> Result<(), String> {
        match value.as_str() {
            Some(s) if self.pattern.is_match(s) => Ok(()),
            Some(s) => Err(format!("'{}' 不匹配模式 {}", s, self.pattern.as_str())),
            None => Err(format!("值 {} 不是字符串类型", value)),
        }
    }

    fn name(&self) -> &str {
        "RegexRule"
    }
}

/// 枚举取值规则
pub struct EnumRule {
    values: BTreeSet<String>,
}

impl EnumRule {
    /// 允许的取值集合
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl ValueRule for EnumRule {
    fn check(&self, value: &Value) -> Result<(), String> {
        match value.as_str() {
            Some(s) if self.values.contains(s) => Ok(()),
            _ => Err(format!("值 {} 不是允许的枚举值", value)),
        }
    }

    fn name(&self) -> &str {
        "EnumRule"
    }
}

struct PathRule {
    pattern: glob::Pattern,
    rule: Box<dyn ValueRule>,
}

/// 规则模式验证器
///
/// 维护已安装模块集合，并按模式路径（去掉列表谓词）上的 glob 模式挂载节点值规则。
/// 另外检查结构：叶子节点下不能有子节点。
pub struct RuleSchemaValidator {
    /// `None` 表示接受任何模块
    modules: Option<BTreeSet<String>>,
    rules: Vec<PathRule>,
}

impl RuleSchemaValidator {
    /// 只接受已安装模块的验证器
    pub fn new() -> Self {
        Self {
            modules: Some(BTreeSet::new()),
            rules: Vec::new(),
        }
    }

    /// 接受任何模块的验证器
    pub fn permissive() -> Self {
        Self {
            modules: None,
            rules: Vec::new(),
        }
    }

    /// 安装模块
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        let module = module.into();
        debug!("安装模块: {}", module);
        if let Some(modules) = &mut self.modules {
            modules.insert(module);
        }
        self
    }

    /// 在模式路径上挂载规则，例如 `/m:x/number` 或 `/m:*/name`
    pub fn with_rule<R: ValueRule + 'static>(
        mut self,
        schema_path: &str,
        rule: R,
    ) -> DatastoreResult<Self> {
        let pattern = glob::Pattern::new(schema_path)
            .map_err(|e| DatastoreError::invalid_path(schema_path, e.to_string()))?;
        info!("注册验证规则: {} -> {}", schema_path, rule.name());
        self.rules.push(PathRule {
            pattern,
            rule: Box::new(rule),
        });
        Ok(self)
    }

    /// 模块是否已安装
    pub fn is_installed(&self, module: &str) -> bool {
        self.modules
            .as_ref()
            .map_or(true, |modules| modules.contains(module))
    }

    /// 已注册的规则数量
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn check_node(&self, module: &str, xpath: &XPath, value: &Value) -> DatastoreResult<()> {
        let schema_path = xpath.schema_path();
        for path_rule in self.rules.iter().filter(|r| r.pattern.matches(&schema_path)) {
            if let Err(reason) = path_rule.rule.check(value) {
                warn!(
                    "节点验证失败: {} ({}) - {}",
                    xpath,
                    path_rule.rule.name(),
                    reason
                );
                return Err(DatastoreError::schema_error(
                    module,
                    format!("{}: {}", xpath, reason),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RuleSchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator for RuleSchemaValidator {
    fn validate_module(&self, module: &str) -> DatastoreResult<()> {
        if self.is_installed(module) {
            Ok(())
        } else {
            Err(DatastoreError::invalid_path(
                format!("/{}:*", module),
                format!("未知模块 '{}'", module),
            ))
        }
    }

    fn validate_path(&self, xpath: &XPath) -> DatastoreResult<()> {
        if self.is_installed(xpath.module()) {
            Ok(())
        } else {
            Err(DatastoreError::invalid_path(
                xpath.to_string(),
                format!("未知模块 '{}'", xpath.module()),
            ))
        }
    }

    fn validate(&self, module: &str, tree: &ConfigTree) -> DatastoreResult<()> {
        let mut previous: Option<(&XPath, &Value)> = None;
        for (xpath, value) in tree {
            if xpath.module() != module {
                return Err(DatastoreError::schema_error(
                    module,
                    format!("节点 {} 不属于模块", xpath),
                ));
            }

            // 文档顺序下，叶子的后代紧跟在叶子之后
            if let Some((leaf, leaf_value)) = previous {
                if !leaf_value.is_node() && leaf.is_ancestor_of(xpath) {
                    return Err(DatastoreError::schema_error(
                        module,
                        format!("叶子节点 {} 不能包含子节点 {}", leaf, xpath),
                    ));
                }
            }

            self.check_node(module, xpath, value)?;
            previous = Some((xpath, value));
        }

        debug!("模块验证通过: {} ({} 个节点)", module, tree.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "RuleSchemaValidator"
    }
}
