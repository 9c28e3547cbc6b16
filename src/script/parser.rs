use crate::script::ast::*;
use crate::script::lexer::{self, Keyword, Punct, Token};
use crate::script::source::{syntax_error, LineIndex, ParseError, Span, Spanned};
use crate::script::ScriptError;
use chumsky::{input::ValueInput, pratt::*, prelude::*, Boxed};
use std::collections::HashMap;
use std::rc::Rc;

type Extra<'code> = extra::Err<ParseError<'code, Token>>;
type Rule<'code, I, O> = Boxed<'code, 'code, I, O, Extra<'code>>;

pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let lines = LineIndex::new(source);
    let tokens = lexer::tokenize(source, &lines)?;
    let input = tokens
        .as_slice()
        .map(Span::from(source.len()..source.len()), |Spanned { node, span }| (node, span));
    let (program, errors) = parser(&lines).parse(input).into_output_errors();
    if let Some(error) = syntax_error(source, &lines, errors) {
        return Err(error);
    }
    let program = program.unwrap_or_default();
    if let Some(line) = top_level_return(&program) {
        return Err(ScriptError::Syntax {
            line,
            column: 1,
            message: "Illegal return statement".to_string(),
        });
    }
    Ok(program)
}

pub fn parser<'code, I>(lines: &'code LineIndex) -> impl Parser<'code, I, Vec<Stmt>, Extra<'code>>
where
    I: ValueInput<'code, Token = Token, Span = Span>,
{
    let statement = recursive(|statement| {
        let block = statement_list(statement.clone(), lines)
            .delimited_by(punct(Punct::BraceOpen), punct(Punct::BraceClose))
            .boxed();
        let assignment = assignment_expression(block.clone());
        let expression = sequence(assignment.clone());
        let pattern = binding_pattern(assignment.clone());
        let params = parameters(pattern.clone(), assignment.clone());

        // Automatic semicolon insertion: a line break or a closing brace also ends a statement.
        let terminator = choice((
            punct(Punct::Semicolon).ignored(),
            just(Token::Newline).ignored(),
            punct(Punct::BraceClose).rewind().ignored(),
            end(),
        ));
        let condition = expression
            .clone()
            .delimited_by(punct(Punct::ParenOpen), punct(Punct::ParenClose));

        let declaration_kind = select! {
            Token::Keyword(Keyword::Const) => DeclKind::Const,
            Token::Keyword(Keyword::Let) => DeclKind::Let,
            Token::Keyword(Keyword::Var) => DeclKind::Var,
        };
        let declarator = pattern
            .clone()
            .then(punct(Punct::Assign).ignore_then(assignment.clone()).or_not())
            .map(|(target, init)| Declarator { target, init });
        let declaration = declaration_kind
            .clone()
            .then(
                declarator
                    .separated_by(punct(Punct::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .validate(|(kind, declarators), e, emitter| {
                for declarator in declarators.iter().filter(|d| d.init.is_none()) {
                    if kind == DeclKind::Const {
                        emitter.emit(Rich::custom(e.span(), "Missing initializer in const declaration"));
                    } else if !matches!(declarator.target, Pattern::Identifier(_)) {
                        emitter.emit(Rich::custom(
                            e.span(),
                            "Missing initializer in destructuring declaration",
                        ));
                    }
                }
                StmtKind::Declaration { kind, declarators }
            })
            .boxed();

        let function_declaration = keyword(Keyword::Function)
            .ignore_then(ident())
            .then(params.clone())
            .then(block.clone())
            .map(|((name, params), body)| {
                StmtKind::Function(function(Some(name), params, FunctionBody::Block(body), false))
            });

        let if_statement = keyword(Keyword::If)
            .ignore_then(condition.clone())
            .then(statement.clone())
            .then(
                newlines()
                    .ignore_then(keyword(Keyword::Else))
                    .ignore_then(statement.clone())
                    .or_not(),
            )
            .map(|((test, consequent), alternate)| StmtKind::If {
                test,
                consequent: Box::new(consequent),
                alternate: alternate.map(Box::new),
            });

        let for_each = keyword(Keyword::For)
            .ignore_then(
                choice((
                    declaration_kind.map(Some).then(pattern.clone()),
                    ident().map(|name| (None, Pattern::Identifier(name))),
                ))
                .then(choice((
                    select! { Token::Ident(word) if word == "of" => true },
                    keyword(Keyword::In).to(false),
                )))
                .then(assignment.clone())
                .delimited_by(punct(Punct::ParenOpen), punct(Punct::ParenClose)),
            )
            .then(statement.clone())
            .map(|((((kind, target), is_of), subject), body)| {
                let body = Box::new(body);
                if is_of {
                    StmtKind::ForOf {
                        kind,
                        target,
                        iterable: subject,
                        body,
                    }
                } else {
                    StmtKind::ForIn {
                        kind,
                        target,
                        object: subject,
                        body,
                    }
                }
            });
        let for_init = choice((declaration.clone(), expression.clone().map(StmtKind::Expression)))
            .map_with(move |kind, e: &mut chumsky::input::MapExtra<'code, '_, I, Extra<'code>>| Stmt {
                kind,
                line: lines.line(e.span().start),
            });
        let for_classic = keyword(Keyword::For)
            .ignore_then(
                for_init
                    .or_not()
                    .then_ignore(punct(Punct::Semicolon))
                    .then(expression.clone().or_not())
                    .then_ignore(punct(Punct::Semicolon))
                    .then(expression.clone().or_not())
                    .delimited_by(punct(Punct::ParenOpen), punct(Punct::ParenClose)),
            )
            .then(statement.clone())
            .map(|(((init, test), update), body)| StmtKind::For {
                init: init.map(Box::new),
                test,
                update,
                body: Box::new(body),
            });

        let while_statement = keyword(Keyword::While)
            .ignore_then(condition.clone())
            .then(statement.clone())
            .map(|(test, body)| StmtKind::While {
                test,
                body: Box::new(body),
            });
        let do_while = keyword(Keyword::Do)
            .ignore_then(statement.clone())
            .then_ignore(newlines())
            .then_ignore(keyword(Keyword::While))
            .then(condition.clone())
            .then_ignore(punct(Punct::Semicolon).or_not())
            .map(|(body, test)| StmtKind::DoWhile {
                body: Box::new(body),
                test,
            });

        let break_statement = keyword(Keyword::Break)
            .then_ignore(terminator.clone())
            .map(|_| StmtKind::Break);
        let continue_statement = keyword(Keyword::Continue)
            .then_ignore(terminator.clone())
            .map(|_| StmtKind::Continue);
        let return_statement = keyword(Keyword::Return)
            .ignore_then(expression.clone().or_not())
            .then_ignore(terminator.clone())
            .map(StmtKind::Return);
        let throw_statement = keyword(Keyword::Throw)
            .ignore_then(just(Token::Newline).or_not())
            .then(expression.clone())
            .then_ignore(terminator.clone())
            .validate(|(line_break, argument), e, emitter| {
                if line_break.is_some() {
                    emitter.emit(Rich::custom(e.span(), "Illegal newline after throw"));
                }
                StmtKind::Throw(argument)
            });

        let catch_clause = newlines()
            .ignore_then(keyword(Keyword::Catch))
            .ignore_then(
                pattern
                    .clone()
                    .delimited_by(punct(Punct::ParenOpen), punct(Punct::ParenClose))
                    .or_not(),
            )
            .then(block.clone());
        let finally_clause = newlines()
            .ignore_then(keyword(Keyword::Finally))
            .ignore_then(block.clone());
        let try_statement = keyword(Keyword::Try)
            .ignore_then(block.clone())
            .then(catch_clause.or_not())
            .then(finally_clause.or_not())
            .validate(|((block, catch), finalizer), e, emitter| {
                if catch.is_none() && finalizer.is_none() {
                    emitter.emit(Rich::custom(e.span(), "Missing catch or finally after try"));
                }
                let (param, handler) = match catch {
                    Some((param, handler)) => (param, Some(handler)),
                    None => (None, None),
                };
                StmtKind::Try {
                    block,
                    param,
                    handler,
                    finalizer,
                }
            });

        let case = newlines()
            .ignore_then(choice((
                keyword(Keyword::Case).ignore_then(expression.clone()).map(Some),
                keyword(Keyword::Default).map(|_| None),
            )))
            .then_ignore(punct(Punct::Colon))
            .then(statement.clone().repeated().collect::<Vec<_>>())
            .map(|(test, body)| SwitchCase { test, body });
        let switch_statement = keyword(Keyword::Switch)
            .ignore_then(condition.clone())
            .then(
                case.repeated()
                    .collect::<Vec<_>>()
                    .then_ignore(newlines())
                    .delimited_by(punct(Punct::BraceOpen), punct(Punct::BraceClose)),
            )
            // every case shares one scope
            .validate(move |(discriminant, cases), _, emitter| {
                if let Some((line, name)) = redeclared(cases.iter().flat_map(|case| &case.body)) {
                    emitter.emit(redeclaration(lines, line, &name));
                }
                StmtKind::Switch {
                    discriminant,
                    cases,
                }
            });

        let unsupported = select! {
            Token::Keyword(keyword @ (Keyword::Import | Keyword::Export | Keyword::Class)) => keyword,
        }
        .validate(|keyword, e, emitter| {
            emitter.emit(Rich::custom(
                e.span(),
                format!("'{}' is not supported in takeoff scripts", keyword.as_str()),
            ));
            StmtKind::Empty
        });

        newlines()
            .ignore_then(
                choice((
                    block.clone().map(StmtKind::Block),
                    punct(Punct::Semicolon).map(|_| StmtKind::Empty),
                    declaration.then_ignore(terminator.clone()),
                    function_declaration,
                    if_statement,
                    for_each,
                    for_classic,
                    while_statement,
                    do_while,
                    break_statement,
                    continue_statement,
                    return_statement,
                    throw_statement,
                    try_statement,
                    switch_statement,
                    unsupported,
                    expression.then_ignore(terminator).map(StmtKind::Expression),
                ))
                .map_with(move |kind, e| Stmt {
                    kind,
                    line: lines.line(e.span().start),
                }),
            )
            .boxed()
    });

    statement_list(statement, lines).then_ignore(end())
}

/// Statements up to the end of a block, checked for conflicting declarations.
fn statement_list<'code, I, P>(statement: P, lines: &'code LineIndex) -> Rule<'code, I, Vec<Stmt>>
where
    I: ValueInput<'code, Token = Token, Span = Span>,
    P: Parser<'code, I, Stmt, Extra<'code>> + Clone + 'code,
{
    statement
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(newlines())
        .validate(move |body, _, emitter| {
            if let Some((line, name)) = redeclared(&body) {
                emitter.emit(redeclaration(lines, line, &name));
            }
            body
        })
        .boxed()
}

fn assignment_expression<'code, I>(block: Rule<'code, I, Vec<Stmt>>) -> Rule<'code, I, Expr>
where
    I: ValueInput<'code, Token = Token, Span = Span>,
{
    recursive(|assignment| {
        let expression = sequence(assignment.clone());
        let params = parameters(binding_pattern(assignment.clone()), assignment.clone());

        let literal = select! {
            Token::Number(n) => Expr::Number(n),
            Token::Str(text) => Expr::Str(Rc::from(text)),
            Token::Template(text) => Expr::Template { quasis: vec![text], exprs: Vec::new() },
            Token::Ident(name) => Expr::Identifier(name),
            Token::Keyword(Keyword::True) => Expr::Bool(true),
            Token::Keyword(Keyword::False) => Expr::Bool(false),
            Token::Keyword(Keyword::Null) => Expr::Null,
            Token::Keyword(Keyword::This) => Expr::This,
        };

        let template = select! { Token::TemplateHead(text) => text }
            .then(
                expression
                    .clone()
                    .then(select! { Token::TemplateMiddle(text) => text })
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then(expression.clone())
            .then(select! { Token::TemplateTail(text) => text })
            .map(|(((head, middles), last), tail)| {
                let mut quasis = vec![head];
                let mut exprs = Vec::with_capacity(middles.len() + 1);
                for (expr, text) in middles {
                    exprs.push(expr);
                    quasis.push(text);
                }
                exprs.push(last);
                quasis.push(tail);
                Expr::Template { quasis, exprs }
            });

        let function_expression = keyword(Keyword::Function)
            .ignore_then(ident().or_not())
            .then(params.clone())
            .then(block.clone())
            .map(|((name, params), body)| {
                Expr::Function(function(name, params, FunctionBody::Block(body), false))
            });

        let array_element = choice((
            punct(Punct::Ellipsis)
                .ignore_then(assignment.clone())
                .map(ArrayElement::Spread),
            assignment.clone().map(ArrayElement::Item),
        ));
        let array = array_element
            .or_not()
            .separated_by(punct(Punct::Comma))
            .collect::<Vec<_>>()
            .delimited_by(punct(Punct::BracketOpen), punct(Punct::BracketClose))
            .map(|mut slots| {
                // a trailing comma is not a hole
                if matches!(slots.last(), Some(None)) {
                    slots.pop();
                }
                Expr::Array(
                    slots
                        .into_iter()
                        .map(|slot| slot.unwrap_or(ArrayElement::Hole))
                        .collect(),
                )
            });

        let computed = expression
            .clone()
            .delimited_by(punct(Punct::BracketOpen), punct(Punct::BracketClose))
            .map(|key| PropertyKey::Computed(Box::new(key)));
        let key = choice((
            computed.clone(),
            select! {
                Token::Ident(name) => name,
                Token::Keyword(keyword) => keyword.as_str().to_string(),
                Token::Str(text) => text,
                Token::Number(n) => crate::domain::value::format_number(n),
            }
            .map(PropertyKey::Static),
        ));
        let property = choice((
            punct(Punct::Ellipsis)
                .ignore_then(assignment.clone())
                .map(ObjectProperty::Spread),
            key.clone()
                .then_ignore(punct(Punct::Colon))
                .then(assignment.clone())
                .map(|(key, value)| ObjectProperty::KeyValue(key, value)),
            key.then(params.clone())
                .then(block.clone())
                .map(|((key, params), body)| {
                    let name = match &key {
                        PropertyKey::Static(name) => Some(name.clone()),
                        PropertyKey::Computed(_) => None,
                    };
                    let method = function(name, params, FunctionBody::Block(body), false);
                    ObjectProperty::KeyValue(key, Expr::Function(method))
                }),
            ident().map(|name| {
                ObjectProperty::KeyValue(PropertyKey::Static(name.clone()), Expr::Identifier(name))
            }),
        ));
        let object = property
            .separated_by(punct(Punct::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(punct(Punct::BraceOpen), punct(Punct::BraceClose))
            .map(Expr::Object);

        let parenthesized = expression
            .clone()
            .delimited_by(punct(Punct::ParenOpen), punct(Punct::ParenClose));

        let primary = choice((
            function_expression,
            template,
            literal,
            array,
            object,
            parenthesized,
        ))
        .boxed();

        let arguments = choice((
            punct(Punct::Ellipsis)
                .ignore_then(assignment.clone())
                .map(Argument::Spread),
            assignment.clone().map(Argument::Positional),
        ))
        .separated_by(punct(Punct::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct(Punct::ParenOpen), punct(Punct::ParenClose))
        .boxed();
        let member = choice((
            punct(Punct::Dot)
                .ignore_then(property_name())
                .map(PropertyKey::Static),
            computed.clone(),
        ));
        let suffix = choice((
            member.clone().map(|property| Suffix::Member(property, false)),
            arguments.clone().map(|arguments| Suffix::Call(arguments, false)),
            punct(Punct::QuestionDot).ignore_then(choice((
                arguments.clone().map(|arguments| Suffix::Call(arguments, true)),
                computed.map(|property| Suffix::Member(property, true)),
                property_name().map(|name| Suffix::Member(PropertyKey::Static(name), true)),
            ))),
        ));
        // `new` takes a member expression and an optional argument list; calls bind after it.
        let new_expression = keyword(Keyword::New)
            .ignore_then(
                primary
                    .clone()
                    .then(
                        member
                            .map(|property| Suffix::Member(property, false))
                            .repeated()
                            .collect::<Vec<_>>(),
                    )
                    .map(|(head, suffixes)| suffixes.into_iter().fold(head, apply_suffix)),
            )
            .then(arguments.or_not())
            .map(|(callee, arguments)| Expr::New {
                callee: Box::new(callee),
                arguments: arguments.unwrap_or_default(),
            });
        let chain = choice((new_expression, primary))
            .then(suffix.repeated().collect::<Vec<_>>())
            .map(|(head, suffixes)| {
                let optional = suffixes.iter().any(Suffix::is_optional);
                let chain = suffixes.into_iter().fold(head, apply_suffix);
                if optional {
                    Expr::OptionalChain(Box::new(chain))
                } else {
                    chain
                }
            });

        let update_operator = || choice((punct(Punct::PlusPlus).to(true), punct(Punct::MinusMinus).to(false)));
        let postfix_update = chain
            .then(update_operator().or_not())
            .validate(|(target, increment), e, emitter| match increment {
                None => target,
                Some(increment) => {
                    if !is_assignable(&target) {
                        emitter.emit(Rich::custom(
                            e.span(),
                            "Invalid left-hand side expression in postfix operation",
                        ));
                    }
                    Expr::Update {
                        increment,
                        prefix: false,
                        target: Box::new(target),
                    }
                }
            });
        let update = recursive(|update| {
            choice((
                update_operator()
                    .then(update)
                    .validate(|(increment, target), e, emitter| {
                        if !is_assignable(&target) {
                            emitter.emit(Rich::custom(
                                e.span(),
                                "Invalid left-hand side expression in prefix operation",
                            ));
                        }
                        Expr::Update {
                            increment,
                            prefix: true,
                            target: Box::new(target),
                        }
                    }),
                postfix_update,
            ))
        })
        .boxed();

        let unary_operator = select! {
            Token::Punct(Punct::Bang) => UnaryOp::Not,
            Token::Punct(Punct::Minus) => UnaryOp::Negate,
            Token::Punct(Punct::Plus) => UnaryOp::Plus,
            Token::Punct(Punct::Tilde) => UnaryOp::BitNot,
            Token::Keyword(Keyword::Typeof) => UnaryOp::Typeof,
            Token::Keyword(Keyword::Void) => UnaryOp::Void,
            Token::Keyword(Keyword::Delete) => UnaryOp::Delete,
        };
        let multiplicative = select! {
            Token::Punct(Punct::Star) => BinaryOp::Mul,
            Token::Punct(Punct::Slash) => BinaryOp::Div,
            Token::Punct(Punct::Percent) => BinaryOp::Rem,
        };
        let additive = select! {
            Token::Punct(Punct::Plus) => BinaryOp::Add,
            Token::Punct(Punct::Minus) => BinaryOp::Sub,
        };
        let shift = select! {
            Token::Punct(Punct::ShiftLeft) => BinaryOp::ShiftLeft,
            Token::Punct(Punct::ShiftRight) => BinaryOp::ShiftRight,
            Token::Punct(Punct::UnsignedShiftRight) => BinaryOp::UnsignedShiftRight,
        };
        let relational = select! {
            Token::Punct(Punct::Less) => BinaryOp::Less,
            Token::Punct(Punct::Greater) => BinaryOp::Greater,
            Token::Punct(Punct::LessEq) => BinaryOp::LessEq,
            Token::Punct(Punct::GreaterEq) => BinaryOp::GreaterEq,
            Token::Keyword(Keyword::Instanceof) => BinaryOp::Instanceof,
            Token::Keyword(Keyword::In) => BinaryOp::In,
        };
        let equality = select! {
            Token::Punct(Punct::Eq) => BinaryOp::Eq,
            Token::Punct(Punct::NotEq) => BinaryOp::NotEq,
            Token::Punct(Punct::StrictEq) => BinaryOp::StrictEq,
            Token::Punct(Punct::StrictNotEq) => BinaryOp::StrictNotEq,
        };

        let binary = update.pratt((
            prefix(14, unary_operator, |op, argument, _| Expr::Unary {
                op,
                argument: Box::new(argument),
            }),
            infix(right(12), punct(Punct::StarStar).to(BinaryOp::Pow), |lhs, op, rhs, _| {
                binary_expr(op, lhs, rhs)
            }),
            infix(left(11), multiplicative, |lhs, op, rhs, _| binary_expr(op, lhs, rhs)),
            infix(left(10), additive, |lhs, op, rhs, _| binary_expr(op, lhs, rhs)),
            infix(left(9), shift, |lhs, op, rhs, _| binary_expr(op, lhs, rhs)),
            infix(left(8), relational, |lhs, op, rhs, _| binary_expr(op, lhs, rhs)),
            infix(left(7), equality, |lhs, op, rhs, _| binary_expr(op, lhs, rhs)),
            infix(left(6), punct(Punct::Amp).to(BinaryOp::BitAnd), |lhs, op, rhs, _| {
                binary_expr(op, lhs, rhs)
            }),
            infix(left(5), punct(Punct::Caret).to(BinaryOp::BitXor), |lhs, op, rhs, _| {
                binary_expr(op, lhs, rhs)
            }),
            infix(left(4), punct(Punct::Pipe).to(BinaryOp::BitOr), |lhs, op, rhs, _| {
                binary_expr(op, lhs, rhs)
            }),
            infix(left(3), punct(Punct::AndAnd).to(LogicalOp::And), |lhs, op, rhs, _| {
                logical_expr(op, lhs, rhs)
            }),
            infix(left(2), punct(Punct::OrOr).to(LogicalOp::Or), |lhs, op, rhs, _| {
                logical_expr(op, lhs, rhs)
            }),
            infix(left(1), punct(Punct::Nullish).to(LogicalOp::Nullish), |lhs, op, rhs, _| {
                logical_expr(op, lhs, rhs)
            }),
        ));

        let conditional = binary
            .then(
                punct(Punct::Question)
                    .ignore_then(assignment.clone())
                    .then_ignore(punct(Punct::Colon))
                    .then(assignment.clone())
                    .or_not(),
            )
            .map(|(test, branches)| match branches {
                None => test,
                Some((consequent, alternate)) => Expr::Conditional {
                    test: Box::new(test),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                },
            });

        let assign_operator = select! {
            Token::Punct(Punct::Assign) => AssignOp::Assign,
            Token::Punct(Punct::PlusAssign) => AssignOp::Arithmetic(BinaryOp::Add),
            Token::Punct(Punct::MinusAssign) => AssignOp::Arithmetic(BinaryOp::Sub),
            Token::Punct(Punct::StarAssign) => AssignOp::Arithmetic(BinaryOp::Mul),
            Token::Punct(Punct::SlashAssign) => AssignOp::Arithmetic(BinaryOp::Div),
            Token::Punct(Punct::PercentAssign) => AssignOp::Arithmetic(BinaryOp::Rem),
            Token::Punct(Punct::StarStarAssign) => AssignOp::Arithmetic(BinaryOp::Pow),
            Token::Punct(Punct::AndAndAssign) => AssignOp::Logical(LogicalOp::And),
            Token::Punct(Punct::OrOrAssign) => AssignOp::Logical(LogicalOp::Or),
            Token::Punct(Punct::NullishAssign) => AssignOp::Logical(LogicalOp::Nullish),
        };
        let assign = conditional
            .then(assign_operator.then(assignment.clone()).or_not())
            .validate(|(target, value), e, emitter| match value {
                None => target,
                Some((op, value)) => {
                    if !is_assignable(&target) {
                        emitter.emit(Rich::custom(e.span(), "Invalid left-hand side in assignment"));
                    }
                    Expr::Assign {
                        op,
                        target: Box::new(target),
                        value: Box::new(value),
                    }
                }
            });

        let arrow = choice((
            ident().map(|name| {
                vec![Param {
                    target: Pattern::Identifier(name),
                    default: None,
                    rest: false,
                }]
            }),
            params,
        ))
        .then_ignore(punct(Punct::Arrow))
        .then(choice((
            block.clone().map(FunctionBody::Block),
            assignment.clone().map(|body| FunctionBody::Expression(Box::new(body))),
        )))
        .map(|(params, body)| Expr::Function(function(None, params, body, true)));

        choice((arrow, assign))
    })
    .boxed()
}

/// Comma-separated assignments; a single one stands for itself.
fn sequence<'code, I, A>(assignment: A) -> Rule<'code, I, Expr>
where
    I: ValueInput<'code, Token = Token, Span = Span>,
    A: Parser<'code, I, Expr, Extra<'code>> + Clone + 'code,
{
    assignment
        .separated_by(punct(Punct::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .map(|mut list| {
            if list.len() == 1 {
                list.remove(0)
            } else {
                Expr::Sequence(list)
            }
        })
        .boxed()
}

enum ObjectEntry {
    Property(PatternProperty),
    Rest(String),
}

enum ArraySlot {
    Element(PatternElement),
    Rest(Pattern),
}

fn binding_pattern<'code, I, A>(assignment: A) -> Rule<'code, I, Pattern>
where
    I: ValueInput<'code, Token = Token, Span = Span>,
    A: Parser<'code, I, Expr, Extra<'code>> + Clone + 'code,
{
    recursive(|pattern| {
        let default = punct(Punct::Assign).ignore_then(assignment.clone()).or_not();

        let key = select! {
            Token::Ident(name) => name,
            Token::Keyword(keyword) => keyword.as_str().to_string(),
            Token::Str(text) => text,
        };
        let entry = choice((
            punct(Punct::Ellipsis).ignore_then(ident()).map(ObjectEntry::Rest),
            key.then(punct(Punct::Colon).ignore_then(pattern.clone()).or_not())
                .then(default.clone())
                .map(|((key, target), default)| {
                    ObjectEntry::Property(PatternProperty {
                        value: PatternElement {
                            target: target.unwrap_or_else(|| Pattern::Identifier(key.clone())),
                            default,
                        },
                        key,
                    })
                }),
        ));
        let object = entry
            .separated_by(punct(Punct::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(punct(Punct::BraceOpen), punct(Punct::BraceClose))
            .map(|entries| {
                let mut properties = Vec::new();
                let mut rest = None;
                for entry in entries {
                    match entry {
                        ObjectEntry::Property(property) => properties.push(property),
                        ObjectEntry::Rest(name) => rest = Some(name),
                    }
                }
                Pattern::Object { properties, rest }
            });

        let slot = choice((
            punct(Punct::Ellipsis)
                .ignore_then(pattern.clone())
                .map(ArraySlot::Rest),
            pattern
                .then(default)
                .map(|(target, default)| ArraySlot::Element(PatternElement { target, default })),
        ));
        let array = slot
            .or_not()
            .separated_by(punct(Punct::Comma))
            .collect::<Vec<_>>()
            .delimited_by(punct(Punct::BracketOpen), punct(Punct::BracketClose))
            .map(|mut slots| {
                if matches!(slots.last(), Some(None)) {
                    slots.pop();
                }
                let mut elements = Vec::new();
                let mut rest = None;
                for slot in slots {
                    match slot {
                        Some(ArraySlot::Element(element)) => elements.push(Some(element)),
                        Some(ArraySlot::Rest(target)) => rest = Some(Box::new(target)),
                        None => elements.push(None),
                    }
                }
                Pattern::Array { elements, rest }
            });

        choice((object, array, ident().map(Pattern::Identifier)))
    })
    .boxed()
}

fn parameters<'code, I, A>(pattern: Rule<'code, I, Pattern>, assignment: A) -> Rule<'code, I, Vec<Param>>
where
    I: ValueInput<'code, Token = Token, Span = Span>,
    A: Parser<'code, I, Expr, Extra<'code>> + Clone + 'code,
{
    choice((
        punct(Punct::Ellipsis)
            .ignore_then(pattern.clone())
            .map(|target| Param {
                target,
                default: None,
                rest: true,
            }),
        pattern
            .then(punct(Punct::Assign).ignore_then(assignment).or_not())
            .map(|(target, default)| Param {
                target,
                default,
                rest: false,
            }),
    ))
    .separated_by(punct(Punct::Comma))
    .allow_trailing()
    .collect::<Vec<_>>()
    .delimited_by(punct(Punct::ParenOpen), punct(Punct::ParenClose))
    .boxed()
}

fn punct<'code, I>(punct: Punct) -> impl Parser<'code, I, Token, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token, Span = Span>,
{
    just(Token::Punct(punct))
}

fn keyword<'code, I>(keyword: Keyword) -> impl Parser<'code, I, Token, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token, Span = Span>,
{
    just(Token::Keyword(keyword))
}

fn newlines<'code, I>() -> impl Parser<'code, I, (), Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token, Span = Span>,
{
    just(Token::Newline).repeated()
}

fn ident<'code, I>() -> impl Parser<'code, I, String, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token, Span = Span>,
{
    select! { Token::Ident(name) => name }
}

/// Identifier or reserved word, as allowed after `.`.
fn property_name<'code, I>() -> impl Parser<'code, I, String, Extra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token, Span = Span>,
{
    select! {
        Token::Ident(name) => name,
        Token::Keyword(keyword) => keyword.as_str().to_string(),
    }
}

enum Suffix {
    Member(PropertyKey, bool),
    Call(Vec<Argument>, bool),
}

impl Suffix {
    fn is_optional(&self) -> bool {
        matches!(self, Self::Member(_, true) | Self::Call(_, true))
    }
}

fn apply_suffix(object: Expr, suffix: Suffix) -> Expr {
    match suffix {
        Suffix::Member(property, optional) => Expr::Member {
            object: Box::new(object),
            property,
            optional,
        },
        Suffix::Call(arguments, optional) => Expr::Call {
            callee: Box::new(object),
            arguments,
            optional,
        },
    }
}

fn function(name: Option<String>, params: Vec<Param>, body: FunctionBody, is_arrow: bool) -> Rc<FunctionDef> {
    Rc::new(FunctionDef {
        name,
        params,
        body,
        is_arrow,
    })
}

fn binary_expr(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical_expr(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_assignable(target: &Expr) -> bool {
    matches!(target, Expr::Identifier(_) | Expr::Member { .. })
}

fn redeclaration<'code>(lines: &LineIndex, line: usize, name: &str) -> ParseError<'code, Token> {
    Rich::custom(
        Span::from(lines.line_start(line)..lines.line_start(line)),
        format!("Identifier '{}' has already been declared", name),
    )
}

/// `let`/`const` names may appear once per block; `var` and function names may repeat.
fn redeclared<'a>(body: impl IntoIterator<Item = &'a Stmt>) -> Option<(usize, String)> {
    let mut seen: HashMap<String, bool> = HashMap::new();
    for stmt in body {
        let (names, lexical) = match &stmt.kind {
            StmtKind::Declaration { kind, declarators } => {
                let mut names = Vec::new();
                for declarator in declarators {
                    declarator.target.bound_names(&mut names);
                }
                (names, *kind != DeclKind::Var)
            }
            StmtKind::Function(def) => (def.name.iter().cloned().collect(), false),
            _ => continue,
        };
        for name in names {
            match seen.get(&name) {
                Some(previous_lexical) if *previous_lexical || lexical => {
                    return Some((stmt.line, name));
                }
                _ => {
                    seen.insert(name, lexical);
                }
            }
        }
    }
    None
}

/// Line of the first `return` outside any function body.
fn top_level_return(body: &[Stmt]) -> Option<usize> {
    let nested = |stmt: &Stmt| top_level_return(std::slice::from_ref(stmt));
    body.iter().find_map(|stmt| match &stmt.kind {
        StmtKind::Return(_) => Some(stmt.line),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => nested(consequent).or_else(|| alternate.as_deref().and_then(nested)),
        StmtKind::For { body, .. }
        | StmtKind::ForOf { body, .. }
        | StmtKind::ForIn { body, .. }
        | StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. } => nested(body),
        StmtKind::Block(body) => top_level_return(body),
        StmtKind::Try {
            block,
            handler,
            finalizer,
            ..
        } => top_level_return(block)
            .or_else(|| handler.as_deref().and_then(top_level_return))
            .or_else(|| finalizer.as_deref().and_then(top_level_return)),
        StmtKind::Switch { cases, .. } => cases.iter().find_map(|case| top_level_return(&case.body)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_statements_without_semicolons() {
        let program = parse_program(
            "const w = getUserInput('width', 20)\nconst l = getUserInput('length', 40)\nlet total = w + l",
        )
        .unwrap();
        assert_eq!(program.len(), 3);
        assert_eq!(program[2].line, 3);
    }

    #[test]
    fn method_chains_continue_across_lines() {
        let program = parse_program(
            "createSection('Roofing')\n  .addPart({ name: 'Shingles', qty: 20, priceLookupKey: 'shingles' })\n  .addPart({ name: 'Nails', qty: 1, priceLookupKey: 'nails' })",
        )
        .unwrap();
        assert_eq!(program.len(), 1);
        match &program[0].kind {
            StmtKind::Expression(Expr::Call { callee, .. }) => {
                assert_eq!(callee.describe(), "createSection(...).addPart(...).addPart");
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn precedence_and_associativity() {
        let program = parse_program("x = 1 + 2 * 3 ** 2 ** 2").unwrap();
        let StmtKind::Expression(Expr::Assign { value, .. }) = &program[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Binary { op: BinaryOp::Add, right, .. } = value.as_ref() else {
            panic!("expected addition at the top");
        };
        let Expr::Binary { op: BinaryOp::Mul, right, .. } = right.as_ref() else {
            panic!("expected multiplication");
        };
        let Expr::Binary { op: BinaryOp::Pow, right, .. } = right.as_ref() else {
            panic!("expected power");
        };
        assert!(matches!(right.as_ref(), Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn logical_operators_bind_looser_than_comparison() {
        let program = parse_program("ok = a < 1 || !b && c ?? d").unwrap();
        let StmtKind::Expression(Expr::Assign { value, .. }) = &program[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Logical { op: LogicalOp::Nullish, left, .. } = value.as_ref() else {
            panic!("expected ?? at the top");
        };
        let Expr::Logical { op: LogicalOp::Or, left, right } = left.as_ref() else {
            panic!("expected ||");
        };
        assert!(matches!(left.as_ref(), Expr::Binary { op: BinaryOp::Less, .. }));
        let Expr::Logical { op: LogicalOp::And, left, .. } = right.as_ref() else {
            panic!("expected &&");
        };
        assert!(matches!(left.as_ref(), Expr::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn arrow_functions_and_destructuring() {
        let program = parse_program(
            "const { a, b: [c, d = 2], ...rest } = obj\nconst f = (x, { y }) => x + y\nconst g = v => ({ v })",
        )
        .unwrap();
        assert_eq!(program.len(), 3);
        let StmtKind::Declaration { declarators, .. } = &program[1].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(declarators[0].init, Some(Expr::Function(ref def)) if def.is_arrow && def.params.len() == 2));
    }

    #[test]
    fn template_substitutions_are_expressions() {
        let program = parse_program("const label = `${qty} x ${item.name}`").unwrap();
        let StmtKind::Declaration { declarators, .. } = &program[0].kind else {
            panic!("expected declaration");
        };
        let Some(Expr::Template { quasis, exprs }) = &declarators[0].init else {
            panic!("expected template");
        };
        assert_eq!(quasis, &vec!["".to_string(), " x ".to_string(), "".to_string()]);
        assert!(matches!(exprs[1], Expr::Member { .. }));
    }

    #[test]
    fn optional_chains_are_wrapped_once() {
        let program = parse_program("parts[0]?.currency.code").unwrap();
        let StmtKind::Expression(Expr::OptionalChain(inner)) = &program[0].kind else {
            panic!("expected optional chain");
        };
        assert!(matches!(inner.as_ref(), Expr::Member { optional: false, .. }));
    }

    #[test]
    fn switch_true_idiom() {
        let program = parse_program(
            "let t = ''\nswitch (true) {\n case l < 16:\n  t = '2x6x20'\n  break\n default:\n  t = '2x10x20'\n}",
        )
        .unwrap();
        let StmtKind::Switch { cases, .. } = &program[1].kind else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 2);
        assert!(cases[1].test.is_none());
    }

    #[test]
    fn else_and_catch_may_start_a_new_line() {
        let program = parse_program(
            "if (a) {\n  x = 1\n}\nelse {\n  x = 2\n}\ntry {\n  f()\n}\ncatch (e) {\n  x = 3\n}",
        )
        .unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(program[0].kind, StmtKind::If { alternate: Some(_), .. }));
        assert!(matches!(program[1].kind, StmtKind::Try { handler: Some(_), .. }));
        assert_eq!(program[1].line, 7);
    }

    #[test]
    fn return_on_its_own_line_returns_undefined() {
        let program = parse_program("function f() {\n return\n 42\n}").unwrap();
        let StmtKind::Function(def) = &program[0].kind else {
            panic!("expected function");
        };
        let FunctionBody::Block(body) = &def.body else {
            panic!("expected block body");
        };
        assert!(matches!(body[0].kind, StmtKind::Return(None)));
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn duplicate_const_is_rejected() {
        let err = parse_program("const a = 1\nconst b = 2\nconst a = 3").unwrap_err();
        match err {
            ScriptError::Syntax { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("'a' has already been declared"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn syntax_errors_point_at_the_offending_token() {
        let err = parse_program("const a = 1\nconst b = )").unwrap_err();
        assert_eq!(
            err,
            ScriptError::Syntax {
                line: 2,
                column: 11,
                message: "Unexpected token )".to_string(),
            }
        );
    }

    #[test]
    fn invalid_assignment_targets_are_rejected() {
        let err = parse_program("f() = 1").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { message, .. } if message.contains("Invalid left-hand side")));
        assert!(parse_program("1++").is_err());
    }

    #[test]
    fn const_needs_an_initializer() {
        assert!(parse_program("const a").is_err());
        assert!(parse_program("let a\nfor (const k of keys) a = k").is_ok());
    }

    #[test]
    fn imports_are_rejected() {
        let err = parse_program("import fs from 'fs'").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { message, .. } if message.contains("'import' is not supported")));
    }

    #[test]
    fn missing_semicolon_between_expressions_on_one_line_is_an_error() {
        assert!(parse_program("a b").is_err());
    }

    #[test]
    fn top_level_return_is_rejected() {
        assert!(parse_program("return 1").is_err());
        assert!(parse_program("const f = () => { return 1 }").is_ok());
    }
}
