use crate::script::source::{syntax_error, LineIndex, ParseError, Span, Spanned};
use crate::script::ScriptError;
use chumsky::prelude::*;
use std::fmt;

/// Deepest bracket or operator nesting a script may use.
const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// A template literal without substitutions.
    Template(String),
    /// Text up to the first `${`.
    TemplateHead(String),
    /// Text between a `}` and the next `${`.
    TemplateMiddle(String),
    /// Text between the last `}` and the closing backtick.
    TemplateTail(String),
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    /// A line break that ends a statement.
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Const,
    Let,
    Var,
    Function,
    Return,
    If,
    Else,
    For,
    While,
    Do,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Typeof,
    Void,
    Delete,
    In,
    Instanceof,
    True,
    False,
    Null,
    This,
    Class,
    Import,
    Export,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        let keyword = match ident {
            "const" => Self::Const,
            "let" => Self::Let,
            "var" => Self::Var,
            "function" => Self::Function,
            "return" => Self::Return,
            "if" => Self::If,
            "else" => Self::Else,
            "for" => Self::For,
            "while" => Self::While,
            "do" => Self::Do,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "switch" => Self::Switch,
            "case" => Self::Case,
            "default" => Self::Default,
            "throw" => Self::Throw,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "finally" => Self::Finally,
            "new" => Self::New,
            "typeof" => Self::Typeof,
            "void" => Self::Void,
            "delete" => Self::Delete,
            "in" => Self::In,
            "instanceof" => Self::Instanceof,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            "this" => Self::This,
            "class" => Self::Class,
            "import" => Self::Import,
            "export" => Self::Export,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Const => "const",
            Self::Let => "let",
            Self::Var => "var",
            Self::Function => "function",
            Self::Return => "return",
            Self::If => "if",
            Self::Else => "else",
            Self::For => "for",
            Self::While => "while",
            Self::Do => "do",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Switch => "switch",
            Self::Case => "case",
            Self::Default => "default",
            Self::Throw => "throw",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Finally => "finally",
            Self::New => "new",
            Self::Typeof => "typeof",
            Self::Void => "void",
            Self::Delete => "delete",
            Self::In => "in",
            Self::Instanceof => "instanceof",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::This => "this",
            Self::Class => "class",
            Self::Import => "import",
            Self::Export => "export",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    BraceOpen,
    BraceClose,
    ParenOpen,
    ParenClose,
    BracketOpen,
    BracketClose,
    Semicolon,
    Comma,
    Dot,
    Ellipsis,
    QuestionDot,
    Question,
    Colon,
    Arrow,
    Assign,
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    PlusPlus,
    MinusMinus,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    StarStarAssign,
    AndAnd,
    OrOr,
    Nullish,
    AndAndAssign,
    OrOrAssign,
    NullishAssign,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    ShiftLeft,
    ShiftRight,
    UnsignedShiftRight,
}

// Longest first: `===` must win over `==` and `=`.
const PUNCTUATORS: &[(&str, Punct)] = &[
    (">>>", Punct::UnsignedShiftRight),
    ("===", Punct::StrictEq),
    ("!==", Punct::StrictNotEq),
    ("**=", Punct::StarStarAssign),
    ("...", Punct::Ellipsis),
    ("&&=", Punct::AndAndAssign),
    ("||=", Punct::OrOrAssign),
    ("??=", Punct::NullishAssign),
    ("=>", Punct::Arrow),
    ("==", Punct::Eq),
    ("!=", Punct::NotEq),
    ("<=", Punct::LessEq),
    (">=", Punct::GreaterEq),
    ("**", Punct::StarStar),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::Nullish),
    ("?.", Punct::QuestionDot),
    ("<<", Punct::ShiftLeft),
    (">>", Punct::ShiftRight),
    ("{", Punct::BraceOpen),
    ("}", Punct::BraceClose),
    ("(", Punct::ParenOpen),
    (")", Punct::ParenClose),
    ("[", Punct::BracketOpen),
    ("]", Punct::BracketClose),
    (";", Punct::Semicolon),
    (",", Punct::Comma),
    (".", Punct::Dot),
    ("?", Punct::Question),
    (":", Punct::Colon),
    ("=", Punct::Assign),
    ("<", Punct::Less),
    (">", Punct::Greater),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("!", Punct::Bang),
    ("&", Punct::Amp),
    ("|", Punct::Pipe),
    ("^", Punct::Caret),
    ("~", Punct::Tilde),
];

impl Punct {
    pub fn as_str(&self) -> &'static str {
        PUNCTUATORS
            .iter()
            .find(|(_, punct)| punct == self)
            .map(|(text, _)| *text)
            .unwrap_or("?")
    }

    /// Operators whose right operand nests another expression of the same kind.
    fn chains_right(&self) -> bool {
        matches!(
            self,
            Self::Question
                | Self::Arrow
                | Self::Assign
                | Self::PlusAssign
                | Self::MinusAssign
                | Self::StarAssign
                | Self::SlashAssign
                | Self::PercentAssign
                | Self::StarStarAssign
                | Self::AndAndAssign
                | Self::OrOrAssign
                | Self::NullishAssign
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Template(_)
            | Self::TemplateHead(_)
            | Self::TemplateMiddle(_)
            | Self::TemplateTail(_) => f.write_str("template literal"),
            Self::Ident(name) => f.write_str(name),
            Self::Keyword(keyword) => f.write_str(keyword.as_str()),
            Self::Punct(punct) => f.write_str(punct.as_str()),
            Self::Newline => f.write_str("line break"),
        }
    }
}

/// Lexes `source` and marks the line breaks that end statements.
pub fn tokenize(source: &str, lines: &LineIndex) -> Result<Vec<Spanned<Token>>, ScriptError> {
    let (tokens, errors) = lexer().parse(source).into_output_errors();
    if let Some(error) = syntax_error(source, lines, errors) {
        return Err(error);
    }
    let tokens = mark_line_breaks(source, tokens.unwrap_or_default());
    if let Some(token) = too_deep(&tokens) {
        let (line, column) = lines.position(source, token.span.start);
        return Err(ScriptError::Syntax {
            line,
            column,
            message: format!("Unexpected token {} (nested too deeply)", token.node),
        });
    }
    Ok(tokens)
}

type LexExtra<'code> = extra::Err<ParseError<'code, char>>;

pub fn lexer<'code>() -> impl Parser<'code, &'code str, Vec<Spanned<Token>>, LexExtra<'code>> {
    let whitespace = any()
        .filter(|c: &char| c.is_whitespace() || *c == '\u{feff}')
        .ignored();
    let line_comment = just("//")
        .then(none_of("\n\r\u{2028}\u{2029}").repeated())
        .ignored();
    let block_comment = just("/*")
        .ignore_then(any().and_is(just("*/").not()).repeated())
        .then(just("*/").or_not())
        .validate(|(_, close), e, emitter| {
            if close.is_none() {
                emitter.emit(Rich::custom(e.span(), "unterminated comment"));
            }
        });
    let trivia = choice((whitespace, line_comment, block_comment)).repeated();

    let digit = any().filter(|c: &char| c.is_ascii_digit());
    let digits = digit
        .clone()
        .then(digit.clone().or(just('_')).repeated());
    let radix = just('0')
        .ignore_then(choice((
            one_of("xX").to(16),
            one_of("oO").to(8),
            one_of("bB").to(2),
        )))
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                .repeated()
                .at_least(1)
                .to_slice(),
        )
        .try_map(|(radix, digits): (u32, &str), span| {
            u64::from_str_radix(&digits.replace('_', ""), radix)
                .map(|n| n as f64)
                .map_err(|_| Rich::custom(span, "invalid number literal"))
        });
    let decimal = choice((
        digits
            .clone()
            .then(just('.').then(digits.clone().or_not()).or_not())
            .ignored(),
        just('.').then(digits.clone()).ignored(),
    ))
    .then(one_of("eE").then(one_of("+-").or_not()).then(digits).or_not())
    .to_slice()
    .try_map(|text: &str, span| {
        text.replace('_', "")
            .parse::<f64>()
            .map_err(|_| Rich::custom(span, format!("invalid number literal '{}'", text)))
    });
    let number = choice((radix, decimal))
        .then(any().filter(|c: &char| is_ident_start(*c)).or_not().rewind())
        .validate(|(n, trailing), e, emitter| {
            if trailing.is_some() {
                emitter.emit(Rich::custom(
                    e.span(),
                    "identifier starts immediately after numeric literal",
                ));
            }
            Token::Number(n)
        });

    let string = choice((quoted('"'), quoted('\''))).map(Token::Str);

    let identifier = any()
        .filter(|c: &char| is_ident_start(*c))
        .then(any().filter(|c: &char| is_ident_part(*c)).repeated())
        .to_slice()
        .map(|word: &str| match Keyword::from_ident(word) {
            Some(keyword) => Token::Keyword(keyword),
            None => Token::Ident(word.to_string()),
        });

    // `?.` followed by a digit is a conditional, not optional chaining
    let punctuator = choice((
        just("?.")
            .then_ignore(any().filter(|c: &char| c.is_ascii_digit()).not())
            .to(Punct::QuestionDot),
        choice(
            PUNCTUATORS
                .iter()
                .filter(|(_, punct)| {
                    !matches!(punct, Punct::BraceOpen | Punct::BraceClose | Punct::QuestionDot)
                })
                .map(|(text, punct)| just(*text).to(*punct))
                .collect::<Vec<_>>(),
        ),
    ))
    .map(Token::Punct);

    let template_text = choice((
        escape(),
        any()
            .filter(|c: &char| *c != '`' && *c != '\\')
            .and_is(just("${").not())
            .map(Some),
    ))
    .repeated()
    .collect::<Vec<_>>()
    .map(|chars| chars.into_iter().flatten().collect::<String>());

    let single = choice((number, string, identifier, punctuator))
        .map_with(|token, e| vec![Spanned::new(token, e.span())]);

    // Braces group their contents so an unmatched `}` ends a template substitution.
    recursive(|tokens| {
        let brace_group = just('{')
            .map_with(|_, e| Spanned::new(Token::Punct(Punct::BraceOpen), e.span()))
            .then(tokens.clone())
            .then(just('}').map_with(|_, e| Spanned::new(Token::Punct(Punct::BraceClose), e.span())))
            .map(|((open, inner), close)| {
                let mut group = vec![open];
                group.extend(inner);
                group.push(close);
                group
            });

        let plain_template = just('`')
            .ignore_then(template_text.clone())
            .then_ignore(just('`'))
            .map_with(|text, e| vec![Spanned::new(Token::Template(text), e.span())]);
        let head = just('`')
            .ignore_then(template_text.clone())
            .then_ignore(just("${"))
            .map_with(|text, e| Spanned::new(Token::TemplateHead(text), e.span()));
        let middle = just('}')
            .ignore_then(template_text.clone())
            .then_ignore(just("${"))
            .map_with(|text, e| Spanned::new(Token::TemplateMiddle(text), e.span()));
        let tail = just('}')
            .ignore_then(template_text.clone())
            .then_ignore(just('`'))
            .map_with(|text, e| Spanned::new(Token::TemplateTail(text), e.span()));
        let substituted_template = head
            .then(tokens.clone().then(middle).repeated().collect::<Vec<_>>())
            .then(tokens.clone())
            .then(tail)
            .map(|(((head, middles), last), tail)| {
                let mut parts = vec![head];
                for (inner, middle) in middles {
                    parts.extend(inner);
                    parts.push(middle);
                }
                parts.extend(last);
                parts.push(tail);
                parts
            });

        let element = choice((brace_group, plain_template, substituted_template, single.clone()));
        trivia
            .clone()
            .ignore_then(element.then_ignore(trivia.clone()).repeated().collect::<Vec<_>>())
            .map(|groups| groups.into_iter().flatten().collect::<Vec<_>>())
    })
    .then_ignore(end())
}

/// A backslash escape; `None` for a line continuation.
fn escape<'code>() -> impl Parser<'code, &'code str, Option<char>, LexExtra<'code>> + Clone {
    let hex_digit = any().filter(|c: &char| c.is_ascii_hexdigit());
    let hex = just('x')
        .ignore_then(hex_digit.clone().repeated().exactly(2).to_slice())
        .try_map(|hex: &str, span| {
            u32::from_str_radix(hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| Rich::custom(span, "invalid hexadecimal escape"))
        });
    let unicode = just('u')
        .ignore_then(choice((
            hex_digit
                .clone()
                .repeated()
                .at_least(1)
                .at_most(6)
                .to_slice()
                .delimited_by(just('{'), just('}')),
            hex_digit.repeated().exactly(4).to_slice(),
        )))
        .try_map(|hex: &str, span| {
            u32::from_str_radix(hex, 16)
                .map(|code| char::from_u32(code).unwrap_or('\u{fffd}'))
                .map_err(|_| Rich::custom(span, "invalid unicode escape"))
        });

    just('\\').ignore_then(choice((
        text::newline().to(None),
        just('n').to(Some('\n')),
        just('t').to(Some('\t')),
        just('r').to(Some('\r')),
        just('b').to(Some('\u{8}')),
        just('f').to(Some('\u{c}')),
        just('v').to(Some('\u{b}')),
        just('0').to(Some('\0')),
        hex.map(Some),
        unicode.map(Some),
        any().map(Some),
    )))
}

fn quoted<'code>(quote: char) -> impl Parser<'code, &'code str, String, LexExtra<'code>> + Clone {
    let character = choice((
        escape(),
        any()
            .filter(move |c: &char| *c != quote && *c != '\\' && !is_line_terminator(*c))
            .map(Some),
    ));
    just(quote)
        .ignore_then(character.repeated().collect::<Vec<_>>())
        .then(just(quote).or_not())
        .validate(|(chars, close), e, emitter| {
            if close.is_none() {
                emitter.emit(Rich::custom(e.span(), "unterminated string literal"));
            }
            chars.into_iter().flatten().collect::<String>()
        })
}

/// Inserts [`Token::Newline`] where a line break ends a statement and turns keywords
/// after `.` or `?.` into property names.
fn mark_line_breaks(source: &str, tokens: Vec<Spanned<Token>>) -> Vec<Spanned<Token>> {
    let mut marked = Vec::with_capacity(tokens.len());
    let mut previous: Option<(Token, usize)> = None;
    for mut token in tokens {
        if let Some((before, end)) = &previous {
            if matches!(before, Token::Punct(Punct::Dot | Punct::QuestionDot)) {
                if let Token::Keyword(keyword) = token.node {
                    token.node = Token::Ident(keyword.as_str().to_string());
                }
            }
            let gap = source.get(*end..token.span.start).unwrap_or_default();
            let breaks = gap.contains(is_line_terminator)
                && (is_restricted(before)
                    || (ends_expression(before) && !continues_expression(before, &token.node)));
            if breaks {
                marked.push(Spanned::new(Token::Newline, Span::from(token.span.start..token.span.start)));
            }
        }
        previous = Some((token.node.clone(), token.span.end));
        marked.push(token);
    }
    marked
}

/// Keywords that never continue onto the next line.
fn is_restricted(token: &Token) -> bool {
    matches!(
        token,
        Token::Keyword(Keyword::Return | Keyword::Break | Keyword::Continue | Keyword::Throw)
    )
}

fn ends_expression(token: &Token) -> bool {
    matches!(
        token,
        Token::Number(_)
            | Token::Str(_)
            | Token::Template(_)
            | Token::TemplateTail(_)
            | Token::Ident(_)
            | Token::Keyword(Keyword::True | Keyword::False | Keyword::Null | Keyword::This)
            | Token::Punct(
                Punct::ParenClose
                    | Punct::BracketClose
                    | Punct::BraceClose
                    | Punct::PlusPlus
                    | Punct::MinusMinus
            )
    )
}

fn continues_expression(before: &Token, next: &Token) -> bool {
    match next {
        Token::TemplateMiddle(_) | Token::TemplateTail(_) => true,
        Token::Keyword(Keyword::In | Keyword::Instanceof) => true,
        Token::Punct(Punct::BraceOpen) => *before == Token::Punct(Punct::ParenClose),
        Token::Punct(punct) => !matches!(
            punct,
            Punct::PlusPlus | Punct::MinusMinus | Punct::Bang | Punct::Tilde | Punct::Ellipsis | Punct::Arrow
        ),
        _ => false,
    }
}

fn is_prefix_operator(token: &Token) -> bool {
    matches!(
        token,
        Token::Keyword(Keyword::Typeof | Keyword::Void | Keyword::Delete | Keyword::New)
            | Token::Punct(
                Punct::Bang | Punct::Tilde | Punct::Plus | Punct::Minus | Punct::PlusPlus | Punct::MinusMinus
            )
    )
}

/// First token past the nesting limit, counting open brackets, chained assignments,
/// conditionals and arrows, and runs of prefix operators.
fn too_deep(tokens: &[Spanned<Token>]) -> Option<&Spanned<Token>> {
    let mut chains = vec![0usize];
    let mut prefix_run = 0usize;
    let mut operand_expected = true;
    for token in tokens {
        match &token.node {
            Token::Punct(Punct::ParenOpen | Punct::BracketOpen | Punct::BraceOpen) | Token::TemplateHead(_) => {
                chains.push(0);
            }
            Token::Punct(Punct::ParenClose | Punct::BracketClose | Punct::BraceClose) | Token::TemplateTail(_) => {
                if chains.len() > 1 {
                    chains.pop();
                }
            }
            Token::Punct(Punct::Comma | Punct::Semicolon) | Token::Newline => {
                if let Some(chain) = chains.last_mut() {
                    *chain = 0;
                }
            }
            Token::Punct(punct) if punct.chains_right() => {
                if let Some(chain) = chains.last_mut() {
                    *chain += 1;
                }
            }
            _ => {}
        }
        prefix_run = if operand_expected && is_prefix_operator(&token.node) {
            prefix_run + 1
        } else {
            0
        };
        let depth = chains.len() - 1 + chains.iter().sum::<usize>() + prefix_run;
        if depth > MAX_NESTING {
            return Some(token);
        }
        operand_expected = !ends_expression(&token.node);
    }
    None
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source, &LineIndex::new(source))
            .unwrap()
            .into_iter()
            .map(|token| token.node)
            .collect()
    }

    #[test]
    fn lexes_declaration_without_semicolon() {
        let source = "const w = getUserInput('width', 20)\nconst l = 1";
        let lines = LineIndex::new(source);
        let tokens = tokenize(source, &lines).unwrap();
        assert_eq!(tokens[0].node, Token::Keyword(Keyword::Const));
        assert_eq!(tokens[3].node, Token::Ident("getUserInput".into()));
        assert_eq!(tokens[5].node, Token::Str("width".into()));
        assert_eq!(tokens[7].node, Token::Number(20.0));
        assert_eq!(tokens[9].node, Token::Newline);
        assert_eq!(tokens[10].node, Token::Keyword(Keyword::Const));
        assert_eq!(lines.line(tokens[10].span.start), 2);
    }

    #[test]
    fn greedy_punctuators() {
        assert_eq!(
            tokens("a === b ?? c?.d ? .5 : x?.5:1"),
            vec![
                Token::Ident("a".into()),
                Token::Punct(Punct::StrictEq),
                Token::Ident("b".into()),
                Token::Punct(Punct::Nullish),
                Token::Ident("c".into()),
                Token::Punct(Punct::QuestionDot),
                Token::Ident("d".into()),
                Token::Punct(Punct::Question),
                Token::Number(0.5),
                Token::Punct(Punct::Colon),
                Token::Ident("x".into()),
                Token::Punct(Punct::Question),
                Token::Number(0.5),
                Token::Punct(Punct::Colon),
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn numbers_and_comments() {
        assert_eq!(
            tokens("16 / 12 // ratio\n/* block */ .5 1e3 0x1F 1_000"),
            vec![
                Token::Number(16.0),
                Token::Punct(Punct::Slash),
                Token::Number(12.0),
                Token::Newline,
                Token::Number(0.5),
                Token::Number(1000.0),
                Token::Number(31.0),
                Token::Number(1000.0),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            tokens(r#"'tornillo coche 3/8" x 21/2"' "a\tb\x41\u{42}\
c""#),
            vec![
                Token::Str("tornillo coche 3/8\" x 21/2\"".into()),
                Token::Str("a\tbABc".into()),
            ]
        );
    }

    #[test]
    fn template_literal_parts() {
        assert_eq!(
            tokens("`Total: ${a + b} ${ {x: 1}.x }`"),
            vec![
                Token::TemplateHead("Total: ".into()),
                Token::Ident("a".into()),
                Token::Punct(Punct::Plus),
                Token::Ident("b".into()),
                Token::TemplateMiddle(" ".into()),
                Token::Punct(Punct::BraceOpen),
                Token::Ident("x".into()),
                Token::Punct(Punct::Colon),
                Token::Number(1.0),
                Token::Punct(Punct::BraceClose),
                Token::Punct(Punct::Dot),
                Token::Ident("x".into()),
                Token::TemplateTail("".into()),
            ]
        );
        assert_eq!(tokens("`plain $ text`"), vec![Token::Template("plain $ text".into())]);
    }

    #[test]
    fn line_breaks_only_end_complete_expressions() {
        assert_eq!(
            tokens("total = a +\n  b\nsection\n  .addPart(x)\nreturn\nx"),
            vec![
                Token::Ident("total".into()),
                Token::Punct(Punct::Assign),
                Token::Ident("a".into()),
                Token::Punct(Punct::Plus),
                Token::Ident("b".into()),
                Token::Newline,
                Token::Ident("section".into()),
                Token::Punct(Punct::Dot),
                Token::Ident("addPart".into()),
                Token::Punct(Punct::ParenOpen),
                Token::Ident("x".into()),
                Token::Punct(Punct::ParenClose),
                Token::Newline,
                Token::Keyword(Keyword::Return),
                Token::Newline,
                Token::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn keywords_after_a_dot_are_property_names() {
        assert_eq!(
            tokens("opts.default"),
            vec![
                Token::Ident("opts".into()),
                Token::Punct(Punct::Dot),
                Token::Ident("default".into()),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let source = "const a = 'oops";
        let err = tokenize(source, &LineIndex::new(source)).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 1, .. }));
    }

    #[test]
    fn identifier_glued_to_a_number_is_rejected() {
        let source = "const a = 3in";
        assert!(tokenize(source, &LineIndex::new(source)).is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let source = format!("x = {}1{}", "(".repeat(300), ")".repeat(300));
        let err = tokenize(&source, &LineIndex::new(&source)).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { message, .. } if message.contains("nested too deeply")));
    }
}
