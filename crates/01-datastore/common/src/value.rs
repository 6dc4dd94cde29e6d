//! 配置数据值定义

use crate::errors::{DatastoreError, DatastoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// decimal64 允许的最大小数位数
pub const MAX_FRACTION_DIGITS: u8 = 18;

/// 定点小数：`digits × 10^-fraction_digits`
///
/// 按整数存储，比较精确且序列化无损。小数位数不同即视为不同的值，
/// `1.5`（15, 1）与 `1.50`（150, 2）不相等。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDecimal64")]
pub struct Decimal64 {
    digits: i64,
    fraction_digits: u8,
}

#[derive(Deserialize)]
struct RawDecimal64 {
    digits: i64,
    fraction_digits: u8,
}

impl TryFrom<RawDecimal64> for Decimal64 {
    type Error = DatastoreError;

    fn try_from(raw: RawDecimal64) -> DatastoreResult<Self> {
        Self::new(raw.digits, raw.fraction_digits)
    }
}

impl Decimal64 {
    /// 创建定点小数，小数位数不能超过 [`MAX_FRACTION_DIGITS`]
    pub fn new(digits: i64, fraction_digits: u8) -> DatastoreResult<Self> {
        if fraction_digits > MAX_FRACTION_DIGITS {
            return Err(DatastoreError::invalid_value(
                format!("{digits}e-{fraction_digits}"),
                format!("小数位数不能超过 {MAX_FRACTION_DIGITS}"),
            ));
        }
        Ok(Self {
            digits,
            fraction_digits,
        })
    }

    /// 去掉小数点后的整数
    pub fn digits(self) -> i64 {
        self.digits
    }

    /// 小数位数
    pub fn fraction_digits(self) -> u8 {
        self.fraction_digits
    }

    /// 近似的浮点值，只用于范围检查
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(self) -> f64 {
        self.digits as f64 / 10f64.powi(i32::from(self.fraction_digits))
    }
}

impl fmt::Display for Decimal64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.digits < 0 { "-" } else { "" };
        let magnitude = self.digits.unsigned_abs();
        if self.fraction_digits == 0 {
            return write!(f, "{sign}{magnitude}");
        }
        let scale = 10u64.pow(u32::from(self.fraction_digits));
        write!(
            f,
            "{sign}{}.{:0width$}",
            magnitude / scale,
            magnitude % scale,
            width = usize::from(self.fraction_digits)
        )
    }
}

impl FromStr for Decimal64 {
    type Err = DatastoreError;

    /// 解析 `-12.50` 形式的文本，小数位数取小数点后的位数
    fn from_str(s: &str) -> DatastoreResult<Self> {
        let invalid = |reason: &str| DatastoreError::invalid_value(s, reason);
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
        let unsigned = int_part.strip_prefix('-').unwrap_or(int_part);
        if unsigned.is_empty() || (s.contains('.') && frac_part.is_empty()) {
            return Err(invalid("缺少数字"));
        }
        if !unsigned.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid("只能包含数字、负号和一个小数点"));
        }
        let fraction_digits =
            u8::try_from(frac_part.len()).map_err(|_| invalid("小数位数过多"))?;
        let digits = format!("{int_part}{frac_part}")
            .parse::<i64>()
            .map_err(|_| invalid("超出 decimal64 范围"))?;
        Self::new(digits, fraction_digits)
    }
}

/// 值类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// 容器节点
    Container,
    /// 列表条目
    List,
    /// 空类型叶子
    Empty,
    /// 布尔
    Bool,
    /// 8 位有符号整数
    Int8,
    /// 16 位有符号整数
    Int16,
    /// 32 位有符号整数
    Int32,
    /// 64 位有符号整数
    Int64,
    /// 8 位无符号整数
    Uint8,
    /// 16 位无符号整数
    Uint16,
    /// 32 位无符号整数
    Uint32,
    /// 64 位无符号整数
    Uint64,
    /// 定点小数
    Decimal64,
    /// 字符串
    String,
    /// 枚举
    Enum,
    /// 二进制（base64 文本）
    Binary,
    /// 身份引用
    IdentityRef,
}

impl ValueType {
    /// 类型名称
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::List => "list",
            Self::Empty => "empty",
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Decimal64 => "decimal64",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Binary => "binary",
            Self::IdentityRef => "identityref",
        }
    }

    /// 是否为数值类型
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
                | Self::Decimal64
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 配置数据值
///
/// 构造后不可变。相等性比较同时比较类型标签和内容，不做跨类型转换：
/// `Int32(10)` 与 `Int64(10)` 不相等。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// 容器节点
    Container,
    /// 列表条目
    List,
    /// 空类型叶子
    Empty,
    /// 布尔
    Bool(bool),
    /// 8 位有符号整数
    Int8(i8),
    /// 16 位有符号整数
    Int16(i16),
    /// 32 位有符号整数
    Int32(i32),
    /// 64 位有符号整数
    Int64(i64),
    /// 8 位无符号整数
    Uint8(u8),
    /// 16 位无符号整数
    Uint16(u16),
    /// 32 位无符号整数
    Uint32(u32),
    /// 64 位无符号整数
    Uint64(u64),
    /// 定点小数
    Decimal64(Decimal64),
    /// 字符串
    String(String),
    /// 枚举
    Enum(String),
    /// 二进制（base64 文本）
    Binary(String),
    /// 身份引用
    #[serde(rename = "identityref")]
    IdentityRef(String),
}

impl Value {
    /// 获取类型标签
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Container => ValueType::Container,
            Self::List => ValueType::List,
            Self::Empty => ValueType::Empty,
            Self::Bool(_) => ValueType::Bool,
            Self::Int8(_) => ValueType::Int8,
            Self::Int16(_) => ValueType::Int16,
            Self::Int32(_) => ValueType::Int32,
            Self::Int64(_) => ValueType::Int64,
            Self::Uint8(_) => ValueType::Uint8,
            Self::Uint16(_) => ValueType::Uint16,
            Self::Uint32(_) => ValueType::Uint32,
            Self::Uint64(_) => ValueType::Uint64,
            Self::Decimal64(_) => ValueType::Decimal64,
            Self::String(_) => ValueType::String,
            Self::Enum(_) => ValueType::Enum,
            Self::Binary(_) => ValueType::Binary,
            Self::IdentityRef(_) => ValueType::IdentityRef,
        }
    }

    /// 是否为内部节点（容器或列表条目）
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Container | Self::List)
    }

    /// 数值视图，用于范围检查
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Int8(v) => Some(f64::from(v)),
            Self::Int16(v) => Some(f64::from(v)),
            Self::Int32(v) => Some(f64::from(v)),
            Self::Int64(v) => Some(v as f64),
            Self::Uint8(v) => Some(f64::from(v)),
            Self::Uint16(v) => Some(f64::from(v)),
            Self::Uint32(v) => Some(f64::from(v)),
            Self::Uint64(v) => Some(v as f64),
            Self::Decimal64(v) => Some(v.to_f64()),
            _ => None,
        }
    }

    /// 文本视图
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) | Self::Binary(s) | Self::IdentityRef(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container | Self::List | Self::Empty => write!(f, "({})", self.value_type()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Uint8(v) => write!(f, "{v}"),
            Self::Uint16(v) => write!(f, "{v}"),
            Self::Uint32(v) => write!(f, "{v}"),
            Self::Uint64(v) => write!(f, "{v}"),
            Self::Decimal64(v) => write!(f, "{v}"),
            Self::String(s) | Self::Enum(s) | Self::Binary(s) | Self::IdentityRef(s) => {
                f.write_str(s)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Uint32(v)
    }
}

impl From<Decimal64> for Value {
    fn from(v: Decimal64) -> Self {
        Self::Decimal64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
