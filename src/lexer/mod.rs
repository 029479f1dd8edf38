pub mod token;
pub use token::is_keyword;

use logos::Logos;
use crate::span::{Span, Spanned};
use crate::diagnostics::CompileError;
use token::Token;

/// Tokenize a source module. Leading whitespace of each logical line is turned
/// into `Indent`/`Dedent` tokens; newlines inside brackets and blank or
/// comment-only lines produce nothing.
pub fn lex(source: &str) -> Result<Vec<Spanned<Token>>, CompileError> {
    let mut raw = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(Token::Comment) => continue,
            Ok(tok) => raw.push(Spanned::new(tok, Span::new(span.start, span.end))),
            Err(()) => {
                return Err(CompileError::syntax(
                    format!("unexpected character '{}'", &source[span.start..span.end]),
                    Span::new(span.start, span.end),
                ));
            }
        }
    }

    let mut tokens = Vec::with_capacity(raw.len() + 16);
    let mut indents: Vec<usize> = vec![0];
    let mut depth: usize = 0;
    let mut at_line_start = true;

    for tok in raw {
        match tok.node {
            Token::Newline => {
                if depth == 0 && !at_line_start {
                    tokens.push(tok);
                    at_line_start = true;
                }
                continue;
            }
            Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => {
                if depth == 0 {
                    return Err(CompileError::syntax(format!("unmatched '{}'", tok.node), tok.span));
                }
                depth -= 1;
            }
            _ => {}
        }

        if at_line_start {
            at_line_start = false;
            let column = indentation_of(source, tok.span.start);
            let current = indents.last().copied().unwrap_or(0);
            if column > current {
                indents.push(column);
                tokens.push(Spanned::new(Token::Indent, Span::new(tok.span.start, tok.span.start)));
            } else if column < current {
                while indents.last().is_some_and(|&level| level > column) {
                    indents.pop();
                    tokens.push(Spanned::new(Token::Dedent, Span::new(tok.span.start, tok.span.start)));
                }
                if indents.last().copied().unwrap_or(0) != column {
                    return Err(CompileError::syntax(
                        "unindent does not match any outer indentation level",
                        Span::new(tok.span.start, tok.span.start),
                    ));
                }
            }
        }
        tokens.push(tok);
    }

    if depth > 0 {
        return Err(CompileError::syntax("unexpected end of file inside brackets", Span::new(source.len(), source.len())));
    }

    let end = Span::new(source.len(), source.len());
    if !at_line_start {
        tokens.push(Spanned::new(Token::Newline, end));
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Spanned::new(Token::Dedent, end));
    }

    // 1.2.3 would otherwise lex as FloatLit(1.2) FloatLit(.3)
    for pair in tokens.windows(2) {
        if matches!(pair[0].node, Token::FloatLit(_))
            && matches!(pair[1].node, Token::FloatLit(_) | Token::Dot)
            && pair[0].span.end == pair[1].span.start
        {
            return Err(CompileError::syntax(
                "invalid number format: multiple decimal points",
                pair[0].span.to(pair[1].span),
            ));
        }
    }

    Ok(tokens)
}

/// Width of the leading whitespace on the line containing `offset`.
fn indentation_of(source: &str, offset: usize) -> usize {
    let line_start = source[..offset].rfind('\n').map_or(0, |nl| nl + 1);
    source[line_start..offset]
        .chars()
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|t| t.node).collect()
    }

    #[test]
    fn lex_simple_assignment() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![Token::Ident, Token::Eq, Token::IntLit(1), Token::Newline]
        );
    }

    #[test]
    fn lex_function_block_emits_indent_and_dedent() {
        let toks = kinds("def f(a):\n    return a\nx = 2\n");
        assert_eq!(
            toks,
            vec![
                Token::Def, Token::Ident, Token::LParen, Token::Ident, Token::RParen, Token::Colon, Token::Newline,
                Token::Indent, Token::Return, Token::Ident, Token::Newline,
                Token::Dedent, Token::Ident, Token::Eq, Token::IntLit(2), Token::Newline,
            ]
        );
    }

    #[test]
    fn lex_closes_open_blocks_at_eof() {
        let toks = kinds("class A:\n    def f(self):\n        pass");
        let dedents = toks.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(toks.last(), Some(&Token::Dedent));
    }

    #[test]
    fn lex_newlines_inside_brackets_ignored() {
        let toks = kinds("xs = [1,\n      2,\n      3]\n");
        assert_eq!(toks.iter().filter(|t| **t == Token::Newline).count(), 1);
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn lex_blank_and_comment_lines_skipped() {
        let toks = kinds("x = 1\n\n    # comment\ny = 2  # trailing\n");
        assert_eq!(toks.iter().filter(|t| **t == Token::Newline).count(), 2);
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn lex_operators() {
        let toks = kinds("a ** b // c != d <= e += 1\n");
        assert!(toks.contains(&Token::StarStar));
        assert!(toks.contains(&Token::SlashSlash));
        assert!(toks.contains(&Token::BangEq));
        assert!(toks.contains(&Token::LtEq));
        assert!(toks.contains(&Token::PlusEq));
    }

    #[test]
    fn lex_literals() {
        let toks = kinds("42 3.5 1e3 2. 'single' \"double\" True False None\n");
        assert_eq!(toks[0], Token::IntLit(42));
        assert_eq!(toks[1], Token::FloatLit(3.5));
        assert_eq!(toks[2], Token::FloatLit(1000.0));
        assert_eq!(toks[3], Token::FloatLit(2.0));
        assert_eq!(toks[4], Token::StringLit("single".to_string()));
        assert_eq!(toks[5], Token::StringLit("double".to_string()));
        assert_eq!(&toks[6..9], &[Token::True, Token::False, Token::None]);
    }

    #[test]
    fn lex_triple_quoted_docstring() {
        let toks = kinds("def f():\n    \"\"\" doc \"string\" here \"\"\"\n    pass\n");
        assert!(toks.contains(&Token::StringLit(" doc \"string\" here ".to_string())));
    }

    #[test]
    fn lex_string_escapes() {
        let toks = kinds(r#"'a\nb' "q\"" "#);
        assert_eq!(toks[0], Token::StringLit("a\nb".to_string()));
        assert_eq!(toks[1], Token::StringLit("q\"".to_string()));
    }

    #[test]
    fn lex_rejects_bad_dedent() {
        let err = lex("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert!(err.to_string().contains("unindent"));
    }

    #[test]
    fn lex_rejects_unmatched_bracket() {
        assert!(lex("x = (1, 2))\n").is_err());
        assert!(lex("x = (1, 2\n").is_err());
    }

    #[test]
    fn lex_rejects_multiple_decimal_points() {
        let err = lex("x = 1.2.3\n").unwrap_err();
        assert!(err.to_string().contains("multiple decimal points"));
    }

    #[test]
    fn lex_unexpected_character() {
        assert!(lex("x = $\n").is_err());
    }

    #[test]
    fn lex_line_continuation() {
        let toks = kinds("x = 1 + \\\n    2\n");
        assert_eq!(toks.iter().filter(|t| **t == Token::Newline).count(), 1);
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn keywords_are_recognized() {
        assert!(is_keyword("elif"));
        assert!(is_keyword("None"));
        assert!(!is_keyword("self"));
    }
}
