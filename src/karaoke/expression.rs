//! `%...%` 内的受限表达式求值器。
//!
//! 只支持整数与字符串字面量、音节绑定变量、`+ - * /` 和括号。

use std::fmt;

use crate::error::EvalErrorKind;

/// 括号与一元负号的最大嵌套层数
const MAX_NESTING_DEPTH: usize = 256;

/// 表达式的值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "整数",
            Value::Str(_) => "字符串",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// 标识符解析接口，由模板层的音节绑定实现。
pub trait Bindings {
    fn lookup(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, EvalErrorKind> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let n = src[pos..end]
                    .parse::<i64>()
                    .map_err(|_| EvalErrorKind::Overflow)?;
                tokens.push((pos, Token::Int(n)));
            }
            '"' | '\'' => {
                chars.next();
                let mut closed = false;
                let mut literal = String::new();
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    literal.push(ch);
                }
                if !closed {
                    return Err(EvalErrorKind::Syntax {
                        position: pos,
                        message: "字符串字面量未闭合".to_string(),
                    });
                }
                tokens.push((pos, Token::Str(literal)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = pos;
                while let Some(&(i, ch)) = chars.peek() {
                    if !(ch.is_alphanumeric() || ch == '_') {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                tokens.push((pos, Token::Ident(src[pos..end].to_string())));
            }
            '+' | '-' | '*' | '/' => {
                chars.next();
                tokens.push((pos, Token::Op(c)));
            }
            '(' => {
                chars.next();
                tokens.push((pos, Token::LParen));
            }
            ')' => {
                chars.next();
                tokens.push((pos, Token::RParen));
            }
            other => {
                return Err(EvalErrorKind::Syntax {
                    position: pos,
                    message: format!("无法识别的字符 '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a, B: Bindings + ?Sized> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    src_len: usize,
    depth: usize,
    bindings: &'a B,
}

impl<B: Bindings + ?Sized> Parser<'_, B> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.src_len, |(p, _)| *p)
    }

    fn syntax(&self, message: &str) -> EvalErrorKind {
        EvalErrorKind::Syntax {
            position: self.position(),
            message: message.to_string(),
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Value, EvalErrorKind> {
        let mut lhs = self.term()?;
        while let Some(&Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> Result<Value, EvalErrorKind> {
        let mut lhs = self.unary()?;
        while let Some(&Token::Op(op @ ('*' | '/'))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    // 每层括号和每个一元负号都会经过这里，在此限制递归深度
    fn unary(&mut self) -> Result<Value, EvalErrorKind> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.syntax("嵌套过深"));
        }
        self.depth += 1;
        let result = self.negation();
        self.depth -= 1;
        result
    }

    fn negation(&mut self) -> Result<Value, EvalErrorKind> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return match self.unary()? {
                Value::Int(n) => n.checked_neg().map(Value::Int).ok_or(EvalErrorKind::Overflow),
                Value::Str(_) => Err(EvalErrorKind::TypeMismatch {
                    op: '-',
                    lhs: "无",
                    rhs: "字符串",
                }),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, EvalErrorKind> {
        let Some((_, token)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.syntax("表达式意外结束"));
        };
        self.pos += 1;
        match token {
            Token::Int(n) => Ok(Value::Int(n)),
            Token::Str(s) => Ok(Value::Str(s)),
            Token::Ident(name) => self
                .bindings
                .lookup(&name)
                .ok_or(EvalErrorKind::UnknownIdentifier(name)),
            Token::LParen => {
                let value = self.expr()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.syntax("缺少右括号"));
                }
                self.pos += 1;
                Ok(value)
            }
            Token::Op(_) | Token::RParen => {
                self.pos -= 1;
                Err(self.syntax("此处需要一个值"))
            }
        }
    }
}

fn apply(op: char, lhs: Value, rhs: Value) -> Result<Value, EvalErrorKind> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                '+' => a.checked_add(b),
                '-' => a.checked_sub(b),
                '*' => a.checked_mul(b),
                '/' => {
                    if b == 0 {
                        return Err(EvalErrorKind::DivisionByZero);
                    }
                    floor_div(a, b)
                }
                _ => None,
            };
            result.map(Value::Int).ok_or(EvalErrorKind::Overflow)
        }
        (lhs, rhs) if op == '+' => Ok(Value::Str(format!("{lhs}{rhs}"))),
        (lhs, rhs) => Err(EvalErrorKind::TypeMismatch {
            op,
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        }),
    }
}

/// 向下取整的整数除法，`-7 / 2 == -4`。
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// 对一段表达式求值。
pub fn evaluate<B: Bindings + ?Sized>(src: &str, bindings: &B) -> Result<Value, EvalErrorKind> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        src_len: src.len(),
        depth: 0,
        bindings,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.syntax("表达式末尾有多余内容"));
    }
    Ok(value)
}
