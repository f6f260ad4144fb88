//! CQL: a text syntax for component filters.
//!
//! ```text
//! Term   := Factor (('&' | '|') Factor)*
//! Factor := Value
//! Value  := 'EXACT' '(' Ident (',' Ident)* ')'
//!         | 'CONTAINS' '(' Ident (',' Ident)* ')'
//!         | 'ALL' '(' ')'
//!         | '!' Value
//!         | '(' Term ')'
//! ```
//!
//! `&` and `|` share one precedence level and associate to the left, so
//! `A | B & C` reads as `(A | B) & C`. `!` binds tighter than either.
//!
//! Nesting through `!` and `(` is capped at [`MAX_DEPTH`] levels.
//!
//! Identifiers are resolved through a caller-supplied lookup that returns the
//! registered component name, so parsing produces exactly the filter the
//! programmatic builders would.

use crate::engine::error::{CqlError, CqlResult};
use crate::engine::filter::ComponentFilter;

/// Deepest `!`/`(` nesting a query may use.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Bang,
}

impl Token {
    fn render(&self) -> String {
        match self {
            Token::Ident(ident) => format!("{ident:?}"),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
            Token::And => "'&'".into(),
            Token::Or => "'|'".into(),
            Token::Bang => "'!'".into(),
        }
    }
}

fn tokenize(input: &str) -> CqlResult<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '&' => Token::And,
            '|' => Token::Or,
            '!' => Token::Bang,
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(ident), position));
                continue;
            }
            found => return Err(CqlError::UnexpectedChar { found, position }),
        };
        tokens.push((token, position));
        chars.next();
    }

    Ok(tokens)
}

struct Parser<'a, L> {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
    depth: usize,
    lookup: &'a L,
}

impl<L> Parser<'_, L>
where
    L: Fn(&str) -> Option<String>,
{
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self, expected: &'static str) -> CqlResult<(Token, usize)> {
        let token = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(CqlError::UnexpectedEnd { expected })?;
        self.cursor += 1;
        Ok(token)
    }

    fn expect(&mut self, want: Token, expected: &'static str) -> CqlResult<()> {
        let (token, position) = self.next(expected)?;
        if token == want {
            Ok(())
        } else {
            Err(CqlError::UnexpectedToken { found: token.render(), expected, position })
        }
    }

    fn nested<F>(&mut self, position: usize, inner: F) -> CqlResult<ComponentFilter>
    where
        F: FnOnce(&mut Self) -> CqlResult<ComponentFilter>,
    {
        if self.depth >= MAX_DEPTH {
            return Err(CqlError::TooDeep { position });
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn term(&mut self) -> CqlResult<ComponentFilter> {
        let mut acc = self.value()?;
        while let Some((token, _)) = self.peek() {
            let op = match token {
                Token::And => Token::And,
                Token::Or => Token::Or,
                _ => break,
            };
            self.cursor += 1;
            let rhs = self.value()?;
            acc = match (op, acc) {
                (Token::And, ComponentFilter::And(mut operands)) => {
                    operands.push(rhs);
                    ComponentFilter::And(operands)
                }
                (Token::And, lhs) => ComponentFilter::And(vec![lhs, rhs]),
                (_, ComponentFilter::Or(mut operands)) => {
                    operands.push(rhs);
                    ComponentFilter::Or(operands)
                }
                (_, lhs) => ComponentFilter::Or(vec![lhs, rhs]),
            };
        }
        Ok(acc)
    }

    fn value(&mut self) -> CqlResult<ComponentFilter> {
        const EXPECTED: &str = "EXACT, CONTAINS, ALL, '!' or '('";

        let (token, position) = self.next(EXPECTED)?;
        match token {
            Token::Bang => self.nested(position, |p| Ok(ComponentFilter::not(p.value()?))),
            Token::LParen => self.nested(position, |p| {
                let inner = p.term()?;
                p.expect(Token::RParen, "')'")?;
                Ok(inner)
            }),
            Token::Ident(keyword) if keyword == "EXACT" => {
                Ok(ComponentFilter::Exact(self.component_list("EXACT")?))
            }
            Token::Ident(keyword) if keyword == "CONTAINS" => {
                Ok(ComponentFilter::Contains(self.component_list("CONTAINS")?))
            }
            Token::Ident(keyword) if keyword == "ALL" => {
                self.expect(Token::LParen, "'('")?;
                self.expect(Token::RParen, "')'")?;
                Ok(ComponentFilter::All)
            }
            other => Err(CqlError::UnexpectedToken { found: other.render(), expected: EXPECTED, position }),
        }
    }

    fn component_list(&mut self, keyword: &'static str) -> CqlResult<Vec<String>> {
        self.expect(Token::LParen, "'('")?;

        if matches!(self.peek(), Some((Token::RParen, _))) {
            return Err(CqlError::EmptyComponentList(keyword));
        }

        let mut names = Vec::new();
        loop {
            let (token, position) = self.next("component name")?;
            let Token::Ident(ident) = token else {
                return Err(CqlError::UnexpectedToken {
                    found: token.render(),
                    expected: "component name",
                    position,
                });
            };
            let name = (self.lookup)(&ident).ok_or(CqlError::UnknownComponent(ident))?;
            names.push(name);

            let (token, position) = self.next("',' or ')'")?;
            match token {
                Token::Comma => continue,
                Token::RParen => break,
                other => {
                    return Err(CqlError::UnexpectedToken {
                        found: other.render(),
                        expected: "',' or ')'",
                        position,
                    })
                }
            }
        }
        Ok(names)
    }
}

/// Parses a CQL expression into a [`ComponentFilter`].
///
/// `lookup` maps an identifier to the registered component name, or `None` if
/// no such component exists.
pub fn parse<L>(input: &str, lookup: L) -> CqlResult<ComponentFilter>
where
    L: Fn(&str) -> Option<String>,
{
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(CqlError::Empty);
    }

    let mut parser = Parser { tokens, cursor: 0, depth: 0, lookup: &lookup };
    let filter = parser.term()?;

    if let Some((token, position)) = parser.peek() {
        return Err(CqlError::UnexpectedToken {
            found: token.render(),
            expected: "'&', '|' or end of input",
            position: *position,
        });
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        ["Alpha", "Beta", "Gamma"].contains(&name).then(|| name.to_string())
    }

    fn cql(input: &str) -> CqlResult<ComponentFilter> {
        parse(input, lookup)
    }

    #[test]
    fn leaves() {
        assert_eq!(cql("EXACT(Alpha, Beta)").unwrap(), ComponentFilter::exact(["Alpha", "Beta"]));
        assert_eq!(cql("CONTAINS(Gamma)").unwrap(), ComponentFilter::contains(["Gamma"]));
        assert_eq!(cql("ALL()").unwrap(), ComponentFilter::All);
    }

    #[test]
    fn binary_operators_are_left_to_right() {
        let parsed = cql("CONTAINS(Alpha) | CONTAINS(Beta) & CONTAINS(Gamma)").unwrap();
        assert_eq!(
            parsed,
            ComponentFilter::and([
                ComponentFilter::or([
                    ComponentFilter::contains(["Alpha"]),
                    ComponentFilter::contains(["Beta"]),
                ]),
                ComponentFilter::contains(["Gamma"]),
            ])
        );

        let parsed = cql("EXACT(Alpha) & EXACT(Beta) & EXACT(Gamma)").unwrap();
        assert_eq!(
            parsed,
            ComponentFilter::and([
                ComponentFilter::exact(["Alpha"]),
                ComponentFilter::exact(["Beta"]),
                ComponentFilter::exact(["Gamma"]),
            ])
        );
    }

    #[test]
    fn negation_and_grouping() {
        let parsed = cql("!CONTAINS(Alpha) & !(EXACT(Beta) | EXACT(Gamma))").unwrap();
        assert_eq!(
            parsed,
            ComponentFilter::and([
                ComponentFilter::not(ComponentFilter::contains(["Alpha"])),
                ComponentFilter::not(ComponentFilter::or([
                    ComponentFilter::exact(["Beta"]),
                    ComponentFilter::exact(["Gamma"]),
                ])),
            ])
        );
        assert_eq!(
            cql("!!ALL()").unwrap(),
            ComponentFilter::not(ComponentFilter::not(ComponentFilter::All))
        );
    }

    #[test]
    fn errors() {
        assert_eq!(cql("EXACT()"), Err(CqlError::EmptyComponentList("EXACT")));
        assert_eq!(cql("CONTAINS()"), Err(CqlError::EmptyComponentList("CONTAINS")));
        assert_eq!(cql("EXACT(Delta)"), Err(CqlError::UnknownComponent("Delta".into())));
        assert_eq!(cql("   "), Err(CqlError::Empty));
        assert!(matches!(cql("EXACT(Alpha"), Err(CqlError::UnexpectedEnd { .. })));
        assert!(matches!(cql("EXACT(Alpha) EXACT(Beta)"), Err(CqlError::UnexpectedToken { position: 13, .. })));
        assert!(matches!(cql("EXACT(Alpha) ^ ALL()"), Err(CqlError::UnexpectedChar { found: '^', .. })));
        assert!(matches!(cql("exact(Alpha)"), Err(CqlError::UnexpectedToken { .. })));
        assert!(matches!(cql("EXACT(Alpha,)"), Err(CqlError::UnexpectedToken { .. })));
    }

    #[test]
    fn nesting_is_capped() {
        let at_limit = format!("{}ALL()", "!".repeat(MAX_DEPTH));
        assert!(cql(&at_limit).is_ok());

        let bangs = format!("{}ALL()", "!".repeat(200_000));
        assert_eq!(cql(&bangs), Err(CqlError::TooDeep { position: MAX_DEPTH }));

        let parens = format!("{}ALL(){}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(cql(&parens), Err(CqlError::TooDeep { position: MAX_DEPTH }));

        let mixed = "!(".repeat(MAX_DEPTH) + "ALL()" + &")".repeat(MAX_DEPTH);
        assert!(matches!(cql(&mixed), Err(CqlError::TooDeep { .. })));
    }
}
