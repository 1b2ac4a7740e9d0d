use crate::ast::{
    BinaryOperator, Block, Expression, GET_ELEMENT, Program, Statement, UnaryOperator,
};
use crate::config::Dialect;
use crate::token::{Span, Token, TokenKind};

mod error;

pub use error::{ParseResult, SyntaxError};

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    position: usize,
    dialect: Dialect,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>, dialect: Dialect) -> Self {
        if !matches!(tokens.last().map(Token::kind), Some(TokenKind::EOF)) {
            let span = tokens.last().map(|token| token.span).unwrap_or_default();
            tokens.push(Token::new(TokenKind::EOF, Span { line: span.line.max(1), ..span }));
        }
        Self {
            tokens,
            position: 0,
            dialect,
        }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::EOF) {
            statements.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.dialect {
            Dialect::Full => self.parse_full_statement(),
            Dialect::Basic => self.parse_basic_statement(),
        }
    }

    // ---- Full dialect -------------------------------------------------

    fn parse_full_statement(&mut self) -> ParseResult<Statement> {
        match self.current().kind {
            TokenKind::Func => self.parse_function_def(),
            TokenKind::If => {
                self.advance();
                let condition = self.parse_expression()?;
                let then_block = self.parse_block()?;
                let else_block = if self.check(&TokenKind::Else) {
                    self.advance();
                    Some(self.parse_block()?)
                } else {
                    None
                };
                Ok(Statement::If {
                    condition,
                    then_block,
                    else_block,
                })
            }
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                Ok(Statement::While { condition, body })
            }
            TokenKind::For => self.parse_for(),
            TokenKind::Return => {
                self.advance();
                Ok(Statement::Return(self.parse_expression()?))
            }
            TokenKind::Identifier(_) if self.peek_kind(1) == &TokenKind::Equal => {
                self.parse_assignment()
            }
            TokenKind::Identifier(_)
                if self.peek_kind(1) == &TokenKind::LBracket && self.is_indexed_assignment() =>
            {
                let name = self.expect_identifier()?;
                self.expect(TokenKind::LBracket, "'['")?;
                let index = self.parse_expression()?;
                self.expect(TokenKind::RBracket, "']'")?;
                self.expect(TokenKind::Equal, "'='")?;
                let value = self.parse_expression()?;
                Ok(Statement::ArrayAssign { name, index, value })
            }
            _ => Ok(Statement::ExprStmt(self.parse_expression()?)),
        }
    }

    fn parse_function_def(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Func, "'func'")?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            while self.check(&TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier()?);
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Statement::FuncDef { name, params, body })
    }

    fn parse_for(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::For, "'for'")?;
        let var = self.expect_identifier()?;
        self.expect(TokenKind::In, "'in'")?;
        let first = self.parse_expression()?;
        if self.check(&TokenKind::To) {
            self.advance();
            let end = self.parse_expression()?;
            let body = self.parse_block()?;
            return Ok(Statement::ForRange {
                var,
                start: first,
                end,
                body,
            });
        }
        let body = self.parse_block()?;
        Ok(Statement::ForIn {
            var,
            iterable: first,
            body,
        })
    }

    fn parse_assignment(&mut self) -> ParseResult<Statement> {
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Equal, "'='")?;
        let value = self.parse_expression()?;
        Ok(Statement::VarAssign { name, value })
    }

    /// `{ statement* }`, or a single statement when no brace follows. A
    /// leading `:` is optional.
    fn parse_block(&mut self) -> ParseResult<Block> {
        if self.check(&TokenKind::Colon) {
            self.advance();
        }
        if !self.check(&TokenKind::LBrace) {
            return Ok(vec![self.parse_statement()?]);
        }
        self.advance();
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::EOF) {
                return Err(self.error("'}'"));
            }
            statements.push(self.parse_statement()?);
        }
        self.advance();
        Ok(statements)
    }

    /// Scans past the bracketed index after an identifier to see whether an
    /// `=` follows, which makes the statement an indexed assignment.
    fn is_indexed_assignment(&self) -> bool {
        let mut depth = 0usize;
        let mut offset = 1;
        loop {
            match self.peek_kind(offset) {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_kind(offset + 1) == &TokenKind::Equal;
                    }
                }
                TokenKind::EOF => return false,
                _ => {}
            }
            offset += 1;
        }
    }

    // ---- Basic dialect ------------------------------------------------

    fn parse_basic_statement(&mut self) -> ParseResult<Statement> {
        let statement = match self.current().kind {
            TokenKind::Make => {
                self.advance();
                self.parse_assignment()?
            }
            TokenKind::Show => {
                self.advance();
                let value = self.parse_expression()?;
                Statement::ExprStmt(Expression::call("print", vec![value]))
            }
            TokenKind::Loop => {
                self.advance();
                let condition = self.parse_expression()?;
                self.expect(TokenKind::Colon, "':'")?;
                let body = self.parse_offside_body()?;
                self.expect(TokenKind::Stop, "'stop'")?;
                Statement::While { condition, body }
            }
            TokenKind::If => {
                self.advance();
                let condition = self.parse_expression()?;
                self.expect(TokenKind::Colon, "':'")?;
                let then_block = self.parse_offside_body()?;
                let else_block = if self.check(&TokenKind::Else) {
                    self.advance();
                    self.expect(TokenKind::Colon, "':'")?;
                    Some(self.parse_offside_body()?)
                } else {
                    None
                };
                self.expect(TokenKind::Stop, "'stop'")?;
                Statement::If {
                    condition,
                    then_block,
                    else_block,
                }
            }
            _ => return Err(self.error("statement")),
        };
        self.expect_line_end()?;
        Ok(statement)
    }

    /// An indented run of statements, or, without indentation, everything up
    /// to the next `else`/`stop`.
    fn parse_offside_body(&mut self) -> ParseResult<Block> {
        self.skip_newlines();
        let mut statements = Vec::new();
        if self.check(&TokenKind::Indent) {
            self.advance();
            loop {
                self.skip_newlines();
                match self.current().kind {
                    TokenKind::Dedent => {
                        self.advance();
                        break;
                    }
                    TokenKind::EOF => return Err(self.error("dedent")),
                    _ => statements.push(self.parse_statement()?),
                }
            }
        } else {
            loop {
                self.skip_newlines();
                if matches!(
                    self.current().kind,
                    TokenKind::Stop | TokenKind::Else | TokenKind::EOF
                ) {
                    break;
                }
                statements.push(self.parse_statement()?);
            }
        }
        self.skip_newlines();
        Ok(statements)
    }

    /// A line ends at a newline (consumed), a block end, or end of input.
    fn expect_line_end(&mut self) -> ParseResult<()> {
        match self.current().kind {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Dedent | TokenKind::EOF => Ok(()),
            _ => Err(self.error("end of line")),
        }
    }

    // ---- Expressions --------------------------------------------------

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_additive()?;
        while let Some(op) = self.comparison_operator() {
            self.advance();
            let right = self.parse_additive()?;
            expr = Expression::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = Expression::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOperator::Mul,
                TokenKind::Slash => BinaryOperator::Div,
                TokenKind::Percent => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = Expression::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let full = self.dialect.functions_enabled();
        match &self.current().kind {
            TokenKind::Integer(value) => {
                let value = *value;
                self.advance();
                Ok(Expression::Number(value))
            }
            TokenKind::String(text) => {
                let text = text.to_string();
                self.advance();
                Ok(Expression::String(text))
            }
            TokenKind::Identifier(name) => {
                let name = name.to_string();
                self.advance();
                if full && self.check(&TokenKind::LParen) {
                    let args = self.parse_list(TokenKind::LParen, TokenKind::RParen, "')'")?;
                    return Ok(Expression::Call { name, args });
                }
                if full && self.check(&TokenKind::LBracket) {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    return Ok(Expression::call(
                        GET_ELEMENT,
                        vec![Expression::VarAccess(name), index],
                    ));
                }
                Ok(Expression::VarAccess(name))
            }
            TokenKind::LBracket if full => {
                let elements = self.parse_list(TokenKind::LBracket, TokenKind::RBracket, "']'")?;
                Ok(Expression::ArrayLiteral(elements))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(self.error("expression")),
        }
    }

    fn parse_list(
        &mut self,
        open: TokenKind<'static>,
        close: TokenKind<'static>,
        close_name: &str,
    ) -> ParseResult<Vec<Expression>> {
        self.expect(open, "'('")?;
        let mut items = Vec::new();
        if !self.check(&close) {
            items.push(self.parse_expression()?);
            while self.check(&TokenKind::Comma) {
                self.advance();
                items.push(self.parse_expression()?);
            }
        }
        self.expect(close, close_name)?;
        Ok(items)
    }

    fn comparison_operator(&self) -> Option<BinaryOperator> {
        match self.current().kind {
            TokenKind::EqualEqual => Some(BinaryOperator::Equal),
            TokenKind::NotEqual => Some(BinaryOperator::NotEqual),
            TokenKind::Less => Some(BinaryOperator::Less),
            TokenKind::LessEqual => Some(BinaryOperator::LessEqual),
            TokenKind::Greater => Some(BinaryOperator::Greater),
            TokenKind::GreaterEqual => Some(BinaryOperator::GreaterEqual),
            _ => None,
        }
    }

    // ---- Token cursor -------------------------------------------------

    fn current(&self) -> &Token<'a> {
        self.token_at(self.position)
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind<'a> {
        &self.token_at(self.position + offset).kind
    }

    /// Positions past the end resolve to the trailing EOF token.
    fn token_at(&self, index: usize) -> &Token<'a> {
        let last = self.tokens.len() - 1;
        &self.tokens[index.min(last)]
    }

    fn check(&self, kind: &TokenKind<'_>) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind<'static>, expected: &str) -> ParseResult<()> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = self.current().kind {
            let name = name.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("identifier"))
        }
    }

    fn error(&self, expected: &str) -> SyntaxError {
        let token = self.current();
        SyntaxError {
            expected: expected.to_string(),
            found: token.kind.describe(),
            line: token.line(),
        }
    }
}

pub fn parse(tokens: Vec<Token<'_>>, dialect: Dialect) -> ParseResult<Program> {
    let program = Parser::new(tokens, dialect).parse_program()?;
    log::debug!(
        "parsed {} top-level statements ({} dialect)",
        program.statements.len(),
        dialect.name()
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn parse_source(input: &str, dialect: Dialect) -> ParseResult<Program> {
        parse(tokenize(input, dialect).expect("tokenize"), dialect)
    }

    fn full(input: &str) -> Vec<Statement> {
        parse_source(input, Dialect::Full)
            .expect("parse failed")
            .statements
    }

    fn num(value: i64) -> Expression {
        Expression::Number(value)
    }

    fn var(name: &str) -> Expression {
        Expression::VarAccess(name.to_string())
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let statements = full("1 + 2 * 3");
        assert_eq!(
            statements,
            vec![Statement::ExprStmt(Expression::binary(
                num(1),
                BinaryOperator::Add,
                Expression::binary(num(2), BinaryOperator::Mul, num(3)),
            ))]
        );
    }

    #[test]
    fn binary_levels_fold_left() {
        let statements = full("10 - 4 - 3 < 1 == 0");
        let difference = Expression::binary(
            Expression::binary(num(10), BinaryOperator::Sub, num(4)),
            BinaryOperator::Sub,
            num(3),
        );
        let expected = Expression::binary(
            Expression::binary(difference, BinaryOperator::Less, num(1)),
            BinaryOperator::Equal,
            num(0),
        );
        assert_eq!(statements, vec![Statement::ExprStmt(expected)]);
    }

    #[test]
    fn unary_minus_binds_tighter_than_multiplication() {
        let statements = full("-a * 2");
        let expected = Expression::binary(
            Expression::UnaryOp {
                op: UnaryOperator::Neg,
                operand: Box::new(var("a")),
            },
            BinaryOperator::Mul,
            num(2),
        );
        assert_eq!(statements, vec![Statement::ExprStmt(expected)]);
    }

    #[test]
    fn statement_start_disambiguation() {
        let statements = full(indoc! {"
            a = [1, 2]
            a[0] = 5
            a[1]
            push(a, 3)
        "});
        assert_eq!(
            statements,
            vec![
                Statement::VarAssign {
                    name: "a".to_string(),
                    value: Expression::ArrayLiteral(vec![num(1), num(2)]),
                },
                Statement::ArrayAssign {
                    name: "a".to_string(),
                    index: num(0),
                    value: num(5),
                },
                Statement::ExprStmt(Expression::call(GET_ELEMENT, vec![var("a"), num(1)])),
                Statement::ExprStmt(Expression::call("push", vec![var("a"), num(3)])),
            ]
        );
    }

    #[test]
    fn nested_index_in_assignment_target() {
        let statements = full("a[b[0]] = 1");
        assert_eq!(
            statements,
            vec![Statement::ArrayAssign {
                name: "a".to_string(),
                index: Expression::call(GET_ELEMENT, vec![var("b"), num(0)]),
                value: num(1),
            }]
        );
    }

    #[test]
    fn range_and_collection_for_forms() {
        let statements = full(indoc! {"
            for i in 1 to n: print(i)
            for x in items { print(x) }
        "});
        assert_eq!(
            statements,
            vec![
                Statement::ForRange {
                    var: "i".to_string(),
                    start: num(1),
                    end: var("n"),
                    body: vec![Statement::ExprStmt(Expression::call("print", vec![var("i")]))],
                },
                Statement::ForIn {
                    var: "x".to_string(),
                    iterable: var("items"),
                    body: vec![Statement::ExprStmt(Expression::call("print", vec![var("x")]))],
                },
            ]
        );
    }

    #[test]
    fn parses_function_with_braced_and_single_statement_blocks() {
        let statements = full(indoc! {"
            func max(a, b) {
                if a > b return a
                else { return b }
            }
            func nothing() {}
        "});
        assert_eq!(
            statements,
            vec![
                Statement::FuncDef {
                    name: "max".to_string(),
                    params: vec!["a".to_string(), "b".to_string()],
                    body: vec![Statement::If {
                        condition: Expression::binary(var("a"), BinaryOperator::Greater, var("b")),
                        then_block: vec![Statement::Return(var("a"))],
                        else_block: Some(vec![Statement::Return(var("b"))]),
                    }],
                },
                Statement::FuncDef {
                    name: "nothing".to_string(),
                    params: vec![],
                    body: vec![],
                },
            ]
        );
    }

    #[test]
    fn parses_basic_program() {
        let input = indoc! {r#"
            make x = 0
            loop x < 5:
                show x
                make x = x + 1
            stop
            if x == 5:
                show "done"
            else:
                show "error"
            stop
        "#};
        let program = parse_source(input, Dialect::Basic).expect("parse failed");
        let show = |value| Statement::ExprStmt(Expression::call("print", vec![value]));
        assert_eq!(
            program.statements,
            vec![
                Statement::VarAssign {
                    name: "x".to_string(),
                    value: num(0),
                },
                Statement::While {
                    condition: Expression::binary(var("x"), BinaryOperator::Less, num(5)),
                    body: vec![
                        show(var("x")),
                        Statement::VarAssign {
                            name: "x".to_string(),
                            value: Expression::binary(var("x"), BinaryOperator::Add, num(1)),
                        },
                    ],
                },
                Statement::If {
                    condition: Expression::binary(var("x"), BinaryOperator::Equal, num(5)),
                    then_block: vec![show(Expression::String("done".to_string()))],
                    else_block: Some(vec![show(Expression::String("error".to_string()))]),
                },
            ]
        );
    }

    #[test]
    fn basic_body_without_indentation_runs_to_stop() {
        let input = "loop x < 2:\nshow x\nmake x = x + 1\nstop\n";
        let program = parse_source(input, Dialect::Basic).expect("parse failed");
        let Statement::While { body, .. } = &program.statements[0] else {
            panic!("expected loop, got {:?}", program.statements[0]);
        };
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn basic_nested_blocks() {
        let input = indoc! {r#"
            make j = 0
            loop j < 3:
                if j == 0:
                    show "First"
                else:
                    show "Other"
                stop
                make j = j + 1
            stop
        "#};
        let program = parse_source(input, Dialect::Basic).expect("parse failed");
        let Statement::While { body, .. } = &program.statements[1] else {
            panic!("expected loop");
        };
        assert!(matches!(body[0], Statement::If { .. }));
        assert!(matches!(body[1], Statement::VarAssign { .. }));
    }

    #[test]
    fn reports_missing_stop_with_line() {
        let input = "loop x < 2:\n    show x\nshow 3\n";
        let err = parse_source(input, Dialect::Basic).expect_err("expected failure");
        assert_eq!(err.expected, "'stop'");
        assert_eq!(err.found, "'show'");
        assert_eq!(err.line, 3);
    }

    #[test]
    fn basic_dialect_has_no_calls() {
        let err = parse_source("show f(1)\n", Dialect::Basic).expect_err("expected failure");
        assert_eq!(err.expected, "end of line");
        assert_eq!(err.found, "'('");
    }

    #[test]
    fn reports_unclosed_call() {
        let err = parse_source("print(1, 2\nx = 3", Dialect::Full).expect_err("expected failure");
        assert_eq!(
            err,
            SyntaxError {
                expected: "')'".to_string(),
                found: "identifier 'x'".to_string(),
                line: 2,
            }
        );
        assert_eq!(
            err.to_string(),
            "Expected ')', found identifier 'x' at line 2"
        );
    }

    #[test]
    fn reports_unterminated_block() {
        let err = parse_source("while 1 { x = 1", Dialect::Full).expect_err("expected failure");
        assert_eq!(err.expected, "'}'");
        assert_eq!(err.found, "end of input");
    }

    #[test]
    fn reports_missing_expression() {
        let err = parse_source("x = * 2", Dialect::Full).expect_err("expected failure");
        assert_eq!(err.expected, "expression");
        assert_eq!(err.found, "'*'");
    }
}
