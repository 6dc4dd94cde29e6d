//! 跨组件场景测试


use super::*;
use std::sync::Arc;

const MODULE: &str = "m";
const OTHER_MODULE: &str = "n";

/// 只安装 `m` 和 `n` 两个模块的连接
fn test_connection() -> Connection {
    let validator = RuleSchemaValidator::new()
        .with_module(MODULE)
        .with_module(OTHER_MODULE)
        .with_rule("/m:x/number", RangeRule::between(0.0, 1000.0))
        .expect("规则应该有效");
    Connection::builder("test").validator(Arc::new(validator)).build()
}

fn number_xpath(name: &str) -> String {
    format!("/m:x[name='{}']/number", name)
}
