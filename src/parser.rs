use crate::{
    ast::{
        Alternate, AstNode, ConditionExpr, Conditional, OperatorArgument, Position, SourceLocation,
        strip_quotes,
    },
    error::{ParseError, ParseErrorKind, ParseErrors},
    lexer::{Token, TokenKind, Tokenized, tokenize},
    operators::is_builtin_async,
};

/// The outcome of parsing a template. `ast` is only present when `errors` is
/// empty.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub success: bool,
    pub ast: Option<Vec<AstNode>>,
    pub errors: Vec<ParseError>,
}

impl ParseResult {
    fn parsed(ast: Vec<AstNode>) -> Self {
        Self {
            success: true,
            ast: Some(ast),
            errors: Vec::new(),
        }
    }

    fn failed(mut errors: Vec<ParseError>) -> Self {
        errors.sort_by_key(|e| (e.line, e.column));
        Self {
            success: false,
            ast: None,
            errors,
        }
    }

    pub fn into_result(self) -> Result<Vec<AstNode>, ParseErrors> {
        match self.ast {
            Some(ast) if self.errors.is_empty() => Ok(ast),
            Some(_) | None => Err(ParseErrors(self.errors)),
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    /// End of the most recently consumed token.
    last_end: Position,
    errors: Vec<ParseError>,
    next_context_slot: usize,
}

impl<'a> Parser<'a> {
    const fn new(source: &'a str, tokens: Vec<Token<'a>>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            last_end: Position::start(),
            errors: Vec::new(),
            next_context_slot: 0,
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    /// The keyword following an `[END` token, e.g. `IF` in `[END IF]`.
    fn end_keyword(&self) -> Option<&'a str> {
        self.tokens
            .get(self.pos.saturating_add(1))
            .filter(|t| t.kind == TokenKind::Identifier)
            .map(|t| t.text)
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos = self.pos.saturating_add(1);
        self.last_end = token.end;
        Some(token)
    }

    fn span(&self, start: Position) -> SourceLocation {
        SourceLocation::span(self.source, start, self.last_end)
    }

    fn error(&mut self, position: Position, kind: ParseErrorKind) {
        self.errors.push(ParseError::at(position, kind));
    }

    /// Consume a token of `kind`, or record what was found instead.
    fn expect(&mut self, kind: TokenKind, expected: &str) -> Option<Token<'a>> {
        match self.peek() {
            Some(token) if token.kind == kind => self.bump(),
            Some(token) => {
                let (position, found) = (token.start, describe(token));
                self.error(
                    position,
                    ParseErrorKind::UnexpectedToken {
                        expected: expected.to_owned(),
                        found,
                    },
                );
                None
            }
            None => {
                let position = self.last_end;
                self.error(
                    position,
                    ParseErrorKind::UnexpectedEof {
                        expected: expected.to_owned(),
                    },
                );
                None
            }
        }
    }

    /// Consume one of several token kinds.
    fn expect_any(&mut self, kinds: &[TokenKind], expected: &str) -> Option<Token<'a>> {
        match self.peek_kind() {
            Some(kind) if kinds.contains(&kind) => self.bump(),
            Some(_) | None => {
                let kind = kinds.first().copied().unwrap_or(TokenKind::Identifier);
                self.expect(kind, expected)
            }
        }
    }

    /// Skips to just past the next `closing` token. Stops early, without
    /// consuming, at anything that starts a new construct.
    fn recover_past(&mut self, closing: TokenKind) {
        while let Some(kind) = self.peek_kind() {
            if kind == closing {
                self.bump();
                return;
            }
            if starts_construct(kind) {
                return;
            }
            self.bump();
        }
    }

    fn parse_template(&mut self) -> Vec<AstNode> {
        let mut nodes = Vec::new();
        loop {
            nodes.extend(self.parse_nodes());
            if self.peek().is_none() {
                break;
            }
            self.skip_stray_terminator();
        }
        nodes
    }

    /// Parses nodes until end of input or a token that closes or continues an
    /// enclosing block.
    fn parse_nodes(&mut self) -> Vec<AstNode> {
        let mut nodes = Vec::new();
        while let Some(kind) = self.peek_kind() {
            if matches!(kind, TokenKind::ElseIf | TokenKind::Else | TokenKind::End) {
                break;
            }
            if let Some(node) = self.parse_node() {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self) -> Option<AstNode> {
        let token = self.peek()?.clone();
        match token.kind {
            TokenKind::Text => {
                self.bump();
                Some(AstNode::Text {
                    value: token.text.to_owned(),
                    location: self.span(token.start),
                })
            }
            TokenKind::VariableOpen => self.parse_variable(),
            TokenKind::ContextOpen => self.parse_context(),
            TokenKind::If => self.parse_conditional(),
            TokenKind::Section => self.parse_section(),
            TokenKind::Import => self.parse_import(),
            TokenKind::Include => self.parse_include(),
            TokenKind::UnknownDirective => {
                self.bump();
                self.error(
                    token.start,
                    ParseErrorKind::UnknownDirective {
                        keyword: token.text.trim_start_matches("[#").to_owned(),
                    },
                );
                self.recover_past(TokenKind::DirectiveClose);
                None
            }
            TokenKind::ElseIf | TokenKind::Else | TokenKind::End => {
                self.skip_stray_terminator();
                None
            }
            TokenKind::VariableClose
            | TokenKind::DefaultOp
            | TokenKind::DirectiveClose
            | TokenKind::Identifier
            | TokenKind::StringLiteral
            | TokenKind::Equals
            | TokenKind::OperatorName
            | TokenKind::LParen
            | TokenKind::Argument
            | TokenKind::RParen => {
                self.bump();
                self.error(
                    token.start,
                    ParseErrorKind::UnexpectedToken {
                        expected: "text or a directive".to_owned(),
                        found: describe(&token),
                    },
                );
                None
            }
        }
    }

    /// Reports and skips an `[ELSE IF …]`, `[ELSE]` or `[END …]` with no
    /// block to belong to.
    fn skip_stray_terminator(&mut self) {
        let Some(token) = self.peek().cloned() else {
            return;
        };
        let (directive, opening) = match token.kind {
            TokenKind::ElseIf => ("[ELSE IF]".to_owned(), "[#IF]".to_owned()),
            TokenKind::Else => ("[ELSE]".to_owned(), "[#IF]".to_owned()),
            TokenKind::End => match self.end_keyword() {
                Some(keyword) => (format!("[END {}]", keyword), format!("[#{}]", keyword)),
                None => ("[END]".to_owned(), "opening directive".to_owned()),
            },
            TokenKind::Text
            | TokenKind::VariableOpen
            | TokenKind::VariableClose
            | TokenKind::DefaultOp
            | TokenKind::If
            | TokenKind::Section
            | TokenKind::Import
            | TokenKind::Include
            | TokenKind::UnknownDirective
            | TokenKind::DirectiveClose
            | TokenKind::Identifier
            | TokenKind::StringLiteral
            | TokenKind::Equals
            | TokenKind::OperatorName
            | TokenKind::ContextOpen
            | TokenKind::LParen
            | TokenKind::Argument
            | TokenKind::RParen => return,
        };
        self.bump();
        self.error(
            token.start,
            ParseErrorKind::Unmatched { directive, opening },
        );
        self.recover_past(TokenKind::DirectiveClose);
    }

    fn parse_variable(&mut self) -> Option<AstNode> {
        let open = self.bump()?;
        let Some(path) = self.expect(TokenKind::Identifier, "variable path") else {
            self.recover_past(TokenKind::VariableClose);
            return None;
        };

        let mut default_value = None;
        if self.peek_kind() == Some(TokenKind::DefaultOp) {
            self.bump();
            let Some(literal) = self.expect_any(
                &[TokenKind::StringLiteral, TokenKind::Identifier],
                "default value",
            ) else {
                self.recover_past(TokenKind::VariableClose);
                return None;
            };
            default_value = Some(strip_quotes(literal.text).to_owned());
        }

        if self.expect(TokenKind::VariableClose, "'}}'").is_none() {
            self.recover_past(TokenKind::VariableClose);
            return None;
        }

        Some(AstNode::Variable {
            path: path.text.to_owned(),
            default_value,
            location: self.span(open.start),
        })
    }

    fn parse_context(&mut self) -> Option<AstNode> {
        let open = self.bump()?;
        self.expect(TokenKind::LParen, "'('")?;
        let argument = self.expect(TokenKind::Argument, "asset path")?;
        self.expect(TokenKind::RParen, "')'")?;

        let path = strip_quotes(argument.text.trim());
        if path.is_empty() {
            self.error(
                argument.start,
                ParseErrorKind::UnexpectedToken {
                    expected: "asset path".to_owned(),
                    found: "')'".to_owned(),
                },
            );
            return None;
        }

        let slot = self.next_context_slot;
        self.next_context_slot = slot.saturating_add(1);
        Some(AstNode::Context {
            path: path.to_owned(),
            slot,
            location: self.span(open.start),
        })
    }

    /// Parses `{{var}} #operator(arg)]`, the rest of an `[#IF` or `[ELSE IF`
    /// header.
    fn parse_condition(&mut self) -> Option<ConditionExpr> {
        let condition = self.parse_condition_inner();
        if condition.is_none() {
            self.recover_past(TokenKind::DirectiveClose);
        }
        condition
    }

    fn parse_condition_inner(&mut self) -> Option<ConditionExpr> {
        self.expect(TokenKind::VariableOpen, "'{{' opening the condition variable")?;
        let variable = self.expect(TokenKind::Identifier, "variable path")?;
        self.expect(TokenKind::VariableClose, "'}}'")?;
        let operator = self.expect(TokenKind::OperatorName, "an operator such as #equals")?;

        let mut argument = None;
        if self.peek_kind() == Some(TokenKind::LParen) {
            self.bump();
            let raw = self.expect(TokenKind::Argument, "operator argument")?;
            self.expect(TokenKind::RParen, "')'")?;
            argument = OperatorArgument::classify(raw.text);
        }
        self.expect(TokenKind::DirectiveClose, "']'")?;

        Some(ConditionExpr {
            variable: variable.text.to_owned(),
            operator: operator.text.to_owned(),
            argument,
            is_async: is_builtin_async(operator.text),
        })
    }

    fn parse_conditional(&mut self) -> Option<AstNode> {
        let open = self.bump()?;
        let condition = self.parse_condition();
        let mut healthy = condition.is_some();
        let consequent = self.parse_nodes();

        let mut else_ifs: Vec<(ConditionExpr, Vec<AstNode>, Position)> = Vec::new();
        let mut else_body: Option<Vec<AstNode>> = None;

        loop {
            let Some(token) = self.peek().cloned() else {
                self.error(
                    open.start,
                    ParseErrorKind::UnclosedDirective {
                        directive: "[#IF]".to_owned(),
                        closing: "[END IF]".to_owned(),
                    },
                );
                healthy = false;
                break;
            };

            match token.kind {
                TokenKind::ElseIf => {
                    self.bump();
                    if else_body.is_some() {
                        self.error(token.start, ParseErrorKind::ElseIfAfterElse);
                        healthy = false;
                    }
                    let branch_condition = self.parse_condition();
                    let body = self.parse_nodes();
                    match branch_condition {
                        Some(branch_condition) => {
                            else_ifs.push((branch_condition, body, token.start));
                        }
                        None => healthy = false,
                    }
                }
                TokenKind::Else => {
                    self.bump();
                    if self.expect(TokenKind::DirectiveClose, "']'").is_none() {
                        self.recover_past(TokenKind::DirectiveClose);
                        healthy = false;
                    }
                    let body = self.parse_nodes();
                    if else_body.is_some() {
                        self.error(token.start, ParseErrorKind::DuplicateElse);
                        healthy = false;
                    } else {
                        else_body = Some(body);
                    }
                }
                TokenKind::End => match self.end_keyword() {
                    Some("IF") => {
                        self.bump();
                        self.bump();
                        if self.expect(TokenKind::DirectiveClose, "']'").is_none() {
                            self.recover_past(TokenKind::DirectiveClose);
                            healthy = false;
                        }
                        break;
                    }
                    Some("SECTION") => {
                        // Leave it for the enclosing section.
                        self.error(
                            open.start,
                            ParseErrorKind::UnclosedDirective {
                                directive: "[#IF]".to_owned(),
                                closing: "[END IF]".to_owned(),
                            },
                        );
                        healthy = false;
                        break;
                    }
                    other => {
                        self.bump();
                        self.error(
                            token.start,
                            ParseErrorKind::MismatchedEnd {
                                expected: "[END IF]".to_owned(),
                                found: other.map_or_else(
                                    || "[END]".to_owned(),
                                    |keyword| format!("[END {}]", keyword),
                                ),
                            },
                        );
                        self.recover_past(TokenKind::DirectiveClose);
                        healthy = false;
                        break;
                    }
                },
                TokenKind::Text
                | TokenKind::VariableOpen
                | TokenKind::VariableClose
                | TokenKind::DefaultOp
                | TokenKind::If
                | TokenKind::Section
                | TokenKind::Import
                | TokenKind::Include
                | TokenKind::UnknownDirective
                | TokenKind::DirectiveClose
                | TokenKind::Identifier
                | TokenKind::StringLiteral
                | TokenKind::Equals
                | TokenKind::OperatorName
                | TokenKind::ContextOpen
                | TokenKind::LParen
                | TokenKind::Argument
                | TokenKind::RParen => {
                    // parse_nodes only stops at a terminator or end of input.
                    break;
                }
            }
        }

        let condition = condition.filter(|_| healthy)?;
        let end = self.last_end;

        // Fold the flat ELSE IF list into a right-nested chain, innermost first.
        let mut alternate = else_body.map_or(Alternate::None, Alternate::Else);
        for (branch_condition, body, start) in else_ifs.into_iter().rev() {
            alternate = Alternate::ElseIf(Box::new(Conditional {
                condition: branch_condition,
                consequent: body,
                alternate,
                location: SourceLocation::span(self.source, start, end),
            }));
        }

        Some(AstNode::Conditional(Conditional {
            condition,
            consequent,
            alternate,
            location: self.span(open.start),
        }))
    }

    fn parse_section(&mut self) -> Option<AstNode> {
        let open = self.bump()?;
        let name = self.parse_section_name();
        let mut healthy = name.is_some();
        let mut body = self.parse_nodes();

        loop {
            let Some(token) = self.peek().cloned() else {
                self.error(
                    open.start,
                    ParseErrorKind::UnclosedDirective {
                        directive: "[#SECTION]".to_owned(),
                        closing: "[END SECTION]".to_owned(),
                    },
                );
                healthy = false;
                break;
            };
            if token.kind == TokenKind::End && self.end_keyword() == Some("SECTION") {
                self.bump();
                self.bump();
                if self.expect(TokenKind::DirectiveClose, "']'").is_none() {
                    self.recover_past(TokenKind::DirectiveClose);
                    healthy = false;
                }
                break;
            }
            self.skip_stray_terminator();
            healthy = false;
            body.extend(self.parse_nodes());
        }

        let name = name.filter(|_| healthy)?;
        Some(AstNode::Section {
            name,
            body,
            location: self.span(open.start),
        })
    }

    /// Parses `name="x"]`.
    fn parse_section_name(&mut self) -> Option<String> {
        let name = self.parse_section_name_inner();
        if name.is_none() {
            self.recover_past(TokenKind::DirectiveClose);
        }
        name
    }

    fn parse_section_name_inner(&mut self) -> Option<String> {
        let key = self.expect(TokenKind::Identifier, "name=\"…\"")?;
        if key.text != "name" {
            self.error(
                key.start,
                ParseErrorKind::UnexpectedToken {
                    expected: "name=\"…\"".to_owned(),
                    found: describe(&key),
                },
            );
            return None;
        }
        self.expect(TokenKind::Equals, "'='")?;
        let value = self.expect_any(
            &[TokenKind::StringLiteral, TokenKind::Identifier],
            "section name",
        )?;
        self.expect(TokenKind::DirectiveClose, "']'")?;
        Some(strip_quotes(value.text).to_owned())
    }

    /// Parses the target of an `[#INCLUDE` or `[#IMPORT` directive.
    fn parse_directive_target(&mut self, expected: &str) -> Option<(Position, String)> {
        let open = self.bump()?;
        let target = self.expect_any(&[TokenKind::Identifier, TokenKind::StringLiteral], expected);
        let Some(target) = target else {
            self.recover_past(TokenKind::DirectiveClose);
            return None;
        };
        if self.expect(TokenKind::DirectiveClose, "']'").is_none() {
            self.recover_past(TokenKind::DirectiveClose);
            return None;
        }
        Some((open.start, strip_quotes(target.text).to_owned()))
    }

    fn parse_include(&mut self) -> Option<AstNode> {
        let (start, name) = self.parse_directive_target("section name")?;
        Some(AstNode::Include {
            name,
            location: self.span(start),
        })
    }

    fn parse_import(&mut self) -> Option<AstNode> {
        let (start, path) = self.parse_directive_target("import path")?;
        Some(AstNode::Import {
            path,
            location: self.span(start),
        })
    }
}

const fn starts_construct(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Text
            | TokenKind::If
            | TokenKind::ElseIf
            | TokenKind::Else
            | TokenKind::End
            | TokenKind::Section
            | TokenKind::Import
            | TokenKind::Include
            | TokenKind::UnknownDirective
            | TokenKind::ContextOpen
    )
}

fn describe(token: &Token<'_>) -> String {
    match token.kind {
        TokenKind::Text | TokenKind::Argument => token.kind.describe().to_owned(),
        TokenKind::VariableOpen
        | TokenKind::VariableClose
        | TokenKind::DefaultOp
        | TokenKind::If
        | TokenKind::ElseIf
        | TokenKind::Else
        | TokenKind::End
        | TokenKind::Section
        | TokenKind::Import
        | TokenKind::Include
        | TokenKind::UnknownDirective
        | TokenKind::DirectiveClose
        | TokenKind::Identifier
        | TokenKind::StringLiteral
        | TokenKind::Equals
        | TokenKind::OperatorName
        | TokenKind::ContextOpen
        | TokenKind::LParen
        | TokenKind::RParen => format!("'{}'", token.text),
    }
}

/// Parses `source` into an AST, collecting as many diagnostics as possible in
/// one pass.
pub fn parse(source: &str) -> ParseResult {
    let Tokenized { tokens, errors } = tokenize(source);
    if !errors.is_empty() {
        return ParseResult::failed(errors.into_iter().map(ParseError::from).collect());
    }

    let mut parser = Parser::new(source, tokens);
    let ast = parser.parse_template();
    if parser.errors.is_empty() {
        log::debug!("parsed template into {} top-level nodes", ast.len());
        ParseResult::parsed(ast)
    } else {
        ParseResult::failed(parser.errors)
    }
}
