use strum::EnumString;

use crate::frontend::ast::BinaryOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tok {
    Eof,
    /// Only produced in comment-preserving scan mode
    Comment,

    /* Words */
    Keyword(Keyword),
    Name,   // foo
    NameAt, // @foo

    /* Literals */
    Int,    // 123
    IntBin, // 0b101
    IntOct, // 0o17
    IntHex, // 0x1f
    Float,  // 1.5
    Char,   // 'a'
    Str,    // "hello"

    /* Delimiters */
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }
    Semi,     // ;
    Comma,    // ,

    /* Other punctuation */
    Colon,    // :
    Dot,      // .
    Arrow,    // ->
    Ellipsis, // ...
    Question, // ?

    /* Unary operators */
    Not,   // !
    Tilde, // ~

    /* Binary operators, grouped by precedence level */
    OrOr,     // ||
    AndAnd,   // &&
    Eq,       // ==
    Ne,       // !=
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    Plus,     // +
    Minus,    // -
    Pipe,     // |
    Caret,    // ^
    Star,     // *
    Slash,    // /
    Percent,  // %
    Shl,      // <<
    Shr,      // >>
    Amp,      // &
    AmpCaret, // &^

    /* Increment / decrement */
    Inc, // ++
    Dec, // --

    /* Assignment */
    Assign,         // =
    PlusAssign,     // +=
    MinusAssign,    // -=
    PipeAssign,     // |=
    CaretAssign,    // ^=
    StarAssign,     // *=
    SlashAssign,    // /=
    PercentAssign,  // %=
    ShlAssign,      // <<=
    ShrAssign,      // >>=
    AmpAssign,      // &=
    AmpCaretAssign, // &^=
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Fun,
    Type,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    Import,
    Interface,
}

impl Tok {
    /// Binding strength for binary operators; higher binds tighter. Monotone
    /// per token, `None` for anything that is not a binary operator.
    pub fn precedence(self) -> Option<u8> {
        Some(match self {
            Self::OrOr => 1,
            Self::AndAnd => 2,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge => 3,
            Self::Plus | Self::Minus | Self::Pipe | Self::Caret => 4,
            Self::Star
            | Self::Slash
            | Self::Percent
            | Self::Shl
            | Self::Shr
            | Self::Amp
            | Self::AmpCaret => 5,
            _ => return None,
        })
    }

    pub fn is_operator(self) -> bool {
        self.precedence().is_some()
    }

    pub fn is_assignment_operator(self) -> bool {
        matches!(self, Self::Assign) || self.compound_assign_op().is_some()
    }

    /// The binary operation a compound assignment token lowers to.
    pub fn compound_assign_op(self) -> Option<BinaryOp> {
        Some(match self {
            Self::PlusAssign => BinaryOp::Add,
            Self::MinusAssign => BinaryOp::Sub,
            Self::PipeAssign => BinaryOp::Or,
            Self::CaretAssign => BinaryOp::Xor,
            Self::StarAssign => BinaryOp::Mul,
            Self::SlashAssign => BinaryOp::Div,
            Self::PercentAssign => BinaryOp::Rem,
            Self::ShlAssign => BinaryOp::Shl,
            Self::ShrAssign => BinaryOp::Shr,
            Self::AmpAssign => BinaryOp::And,
            Self::AmpCaretAssign => BinaryOp::AndNot,
            _ => return None,
        })
    }

    pub fn binary_op(self) -> Option<BinaryOp> {
        Some(match self {
            Self::OrOr => BinaryOp::LogOr,
            Self::AndAnd => BinaryOp::LogAnd,
            Self::Eq => BinaryOp::Eq,
            Self::Ne => BinaryOp::Ne,
            Self::Lt => BinaryOp::Lt,
            Self::Le => BinaryOp::Le,
            Self::Gt => BinaryOp::Gt,
            Self::Ge => BinaryOp::Ge,
            Self::Plus => BinaryOp::Add,
            Self::Minus => BinaryOp::Sub,
            Self::Pipe => BinaryOp::Or,
            Self::Caret => BinaryOp::Xor,
            Self::Star => BinaryOp::Mul,
            Self::Slash => BinaryOp::Div,
            Self::Percent => BinaryOp::Rem,
            Self::Shl => BinaryOp::Shl,
            Self::Shr => BinaryOp::Shr,
            Self::Amp => BinaryOp::And,
            Self::AmpCaret => BinaryOp::AndNot,
            _ => return None,
        })
    }

    pub fn is_int_literal(self) -> bool {
        matches!(
            self,
            Self::Int | Self::IntBin | Self::IntOct | Self::IntHex | Self::Char
        )
    }

    /// Keywords which may begin a statement; error recovery inside a
    /// function body synchronizes on these.
    pub fn starts_statement(self) -> bool {
        matches!(
            self,
            Self::Keyword(
                Keyword::Break
                    | Keyword::Continue
                    | Keyword::For
                    | Keyword::Fun
                    | Keyword::If
                    | Keyword::Return
                    | Keyword::Type
                    | Keyword::While
            )
        )
    }
}

impl core::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eof => "end of file",
            Self::Comment => "comment",
            Self::Keyword(Keyword::Fun) => "`fun`",
            Self::Keyword(Keyword::Type) => "`type`",
            Self::Keyword(Keyword::If) => "`if`",
            Self::Keyword(Keyword::Else) => "`else`",
            Self::Keyword(Keyword::While) => "`while`",
            Self::Keyword(Keyword::For) => "`for`",
            Self::Keyword(Keyword::Return) => "`return`",
            Self::Keyword(Keyword::Break) => "`break`",
            Self::Keyword(Keyword::Continue) => "`continue`",
            Self::Keyword(Keyword::Import) => "`import`",
            Self::Keyword(Keyword::Interface) => "`interface`",
            Self::Name => "identifier",
            Self::NameAt => "`@` identifier",
            Self::Int | Self::IntBin | Self::IntOct | Self::IntHex => "integer literal",
            Self::Float => "float literal",
            Self::Char => "character literal",
            Self::Str => "string literal",
            Self::LParen => "`(`",
            Self::RParen => "`)`",
            Self::LBracket => "`[`",
            Self::RBracket => "`]`",
            Self::LBrace => "`{`",
            Self::RBrace => "`}`",
            Self::Semi => "`;`",
            Self::Comma => "`,`",
            Self::Colon => "`:`",
            Self::Dot => "`.`",
            Self::Arrow => "`->`",
            Self::Ellipsis => "`...`",
            Self::Question => "`?`",
            Self::Not => "`!`",
            Self::Tilde => "`~`",
            Self::OrOr => "`||`",
            Self::AndAnd => "`&&`",
            Self::Eq => "`==`",
            Self::Ne => "`!=`",
            Self::Lt => "`<`",
            Self::Le => "`<=`",
            Self::Gt => "`>`",
            Self::Ge => "`>=`",
            Self::Plus => "`+`",
            Self::Minus => "`-`",
            Self::Pipe => "`|`",
            Self::Caret => "`^`",
            Self::Star => "`*`",
            Self::Slash => "`/`",
            Self::Percent => "`%`",
            Self::Shl => "`<<`",
            Self::Shr => "`>>`",
            Self::Amp => "`&`",
            Self::AmpCaret => "`&^`",
            Self::Inc => "`++`",
            Self::Dec => "`--`",
            Self::Assign => "`=`",
            Self::PlusAssign => "`+=`",
            Self::MinusAssign => "`-=`",
            Self::PipeAssign => "`|=`",
            Self::CaretAssign => "`^=`",
            Self::StarAssign => "`*=`",
            Self::SlashAssign => "`/=`",
            Self::PercentAssign => "`%=`",
            Self::ShlAssign => "`<<=`",
            Self::ShrAssign => "`>>=`",
            Self::AmpAssign => "`&=`",
            Self::AmpCaretAssign => "`&^=`",
        };
        f.write_str(s)
    }
}
