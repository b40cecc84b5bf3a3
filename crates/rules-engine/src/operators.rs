//! 表达式操作符定义
//!
//! 操作符集合是封闭的：未知名称在解析阶段即报错，不会被静默忽略。

use std::fmt;

/// 表达式操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // 相等比较
    Eq,
    StrictEq,
    Neq,
    StrictNeq,

    // 数值比较
    Gt,
    Gte,
    Lt,
    Lte,

    // 逻辑
    And,
    Or,
    Not,
    Truthy,
    If,

    // 算术
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,

    // 包含检查
    In,

    // 字符串与数组
    Cat,
    Substr,
    Merge,

    // 序列迭代
    Map,
    Filter,
    Reduce,
    All,
    SomeOf,
    NoneOf,

    // 数据访问
    Var,
    Missing,
    MissingSome,

    Log,
}

/// 操作符允许的参数个数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    Range(usize, usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Self::Exactly(k) => n == k,
            Self::Range(lo, hi) => n >= lo && n <= hi,
            Self::AtLeast(lo) => n >= lo,
            Self::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(k) => write!(f, "{}", k),
            Self::Range(lo, hi) => write!(f, "{}..={}", lo, hi),
            Self::AtLeast(lo) => write!(f, "at least {}", lo),
            Self::Any => write!(f, "any number of"),
        }
    }
}

impl Operator {
    pub const ALL: &'static [Operator] = &[
        Self::Eq,
        Self::StrictEq,
        Self::Neq,
        Self::StrictNeq,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::And,
        Self::Or,
        Self::Not,
        Self::Truthy,
        Self::If,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Mod,
        Self::Min,
        Self::Max,
        Self::In,
        Self::Cat,
        Self::Substr,
        Self::Merge,
        Self::Map,
        Self::Filter,
        Self::Reduce,
        Self::All,
        Self::SomeOf,
        Self::NoneOf,
        Self::Var,
        Self::Missing,
        Self::MissingSome,
        Self::Log,
    ];

    /// 按线上名称查找操作符，`?:` 是 `if` 的别名
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "?:" {
            return Some(Self::If);
        }
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::StrictEq => "===",
            Self::Neq => "!=",
            Self::StrictNeq => "!==",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "!",
            Self::Truthy => "!!",
            Self::If => "if",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Min => "min",
            Self::Max => "max",
            Self::In => "in",
            Self::Cat => "cat",
            Self::Substr => "substr",
            Self::Merge => "merge",
            Self::Map => "map",
            Self::Filter => "filter",
            Self::Reduce => "reduce",
            Self::All => "all",
            Self::SomeOf => "some",
            Self::NoneOf => "none",
            Self::Var => "var",
            Self::Missing => "missing",
            Self::MissingSome => "missing_some",
            Self::Log => "log",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Self::Eq | Self::StrictEq | Self::Neq | Self::StrictNeq => Arity::Exactly(2),
            Self::Gt | Self::Gte => Arity::Exactly(2),
            Self::Lt | Self::Lte => Arity::Range(2, 3),
            Self::And | Self::Or => Arity::AtLeast(1),
            Self::Not | Self::Truthy => Arity::Exactly(1),
            Self::If => Arity::AtLeast(1),
            Self::Add | Self::Merge | Self::Cat | Self::Missing => Arity::Any,
            Self::Sub => Arity::Range(1, 2),
            Self::Mul | Self::Min | Self::Max => Arity::AtLeast(1),
            Self::Div | Self::Mod | Self::In => Arity::Exactly(2),
            Self::Substr => Arity::Range(2, 3),
            Self::Map | Self::Filter | Self::All | Self::SomeOf | Self::NoneOf => Arity::Exactly(2),
            Self::Reduce => Arity::Range(2, 3),
            Self::Var => Arity::Range(0, 2),
            Self::MissingSome => Arity::Exactly(2),
            Self::Log => Arity::Exactly(1),
        }
    }

    /// 参数是否由操作符自行按需求值（短路或逐元素求值）
    pub fn is_lazy(self) -> bool {
        matches!(
            self,
            Self::And
                | Self::Or
                | Self::If
                | Self::Map
                | Self::Filter
                | Self::Reduce
                | Self::All
                | Self::SomeOf
                | Self::NoneOf
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
