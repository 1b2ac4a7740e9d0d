//! Syntax tree shared by the parser and the code generator.
//!
//! Both dialects parse into these nodes; the Basic dialect simply never
//! produces functions, calls other than `print`, or array forms.

/// Callee name an index read `name[index]` desugars to.
pub const GET_ELEMENT: &str = "__get_elem__";

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Number(i64),
    String(String),
    VarAccess(String),
    ArrayLiteral(Vec<Expression>),
    BinOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call {
            name: name.into(),
            args,
        }
    }

    /// True when a string literal appears anywhere in this subtree.
    pub fn contains_string_literal(&self) -> bool {
        match self {
            Expression::String(_) => true,
            Expression::Number(_) | Expression::VarAccess(_) => false,
            Expression::ArrayLiteral(elements) => {
                elements.iter().any(Expression::contains_string_literal)
            }
            Expression::BinOp { left, right, .. } => {
                left.contains_string_literal() || right.contains_string_literal()
            }
            Expression::UnaryOp { operand, .. } => operand.contains_string_literal(),
            Expression::Call { args, .. } => args.iter().any(Expression::contains_string_literal),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnaryOperator {
    Neg,
}

pub type Block = Vec<Statement>;

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    VarAssign {
        name: String,
        value: Expression,
    },
    ArrayAssign {
        name: String,
        index: Expression,
        value: Expression,
    },
    If {
        condition: Expression,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        condition: Expression,
        body: Block,
    },
    /// Inclusive of both bounds; bounds are evaluated once.
    ForRange {
        var: String,
        start: Expression,
        end: Expression,
        body: Block,
    },
    ForIn {
        var: String,
        iterable: Expression,
        body: Block,
    },
    FuncDef {
        name: String,
        params: Vec<String>,
        body: Block,
    },
    Return(Expression),
    ExprStmt(Expression),
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_nested_string_literals() {
        let nested = Expression::binary(
            Expression::Number(1),
            BinaryOperator::Add,
            Expression::call("input", vec![Expression::String("? ".to_string())]),
        );
        assert!(nested.contains_string_literal());

        let numeric = Expression::binary(
            Expression::VarAccess("name".to_string()),
            BinaryOperator::Mul,
            Expression::UnaryOp {
                op: UnaryOperator::Neg,
                operand: Box::new(Expression::Number(2)),
            },
        );
        assert!(!numeric.contains_string_literal());
    }
}
