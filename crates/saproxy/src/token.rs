//! Reactor token layout.
//!
//! ```text
//!  63      56 55   49  48  47         32 31                  0
//! ┌──────────┬───────┬────┬─────────────┬─────────────────────┐
//! │   kind   │   0   │side│ generation  │     slot index      │
//! └──────────┴───────┴────┴─────────────┴─────────────────────┘
//! ```

use crate::arena::PairId;
use crate::pair::Side;

use saproxy_core::Token;

const KIND_LISTENER: u64 = 1 << 56;
const KIND_CONNECT: u64 = 2 << 56;
const KIND_RELAY: u64 = 3 << 56;
const KIND_MASK: u64 = 0xFF << 56;

const SIDE_BIT: u64 = 1 << 48;
const GEN_SHIFT: u32 = 32;
const GEN_MASK: u64 = 0xFFFF << GEN_SHIFT;
const IDX_MASK: u64 = 0xFFFF_FFFF;

/// What a readiness record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Listener,
    /// The pending upstream connect of a pair.
    Connect(PairId),
    /// One endpoint of a relaying pair.
    Relay(PairId, Side),
}

fn pair_bits(id: PairId) -> u64 {
    ((id.generation() as u64) << GEN_SHIFT) | id.index() as u64
}

pub fn listener() -> Token {
    Token(KIND_LISTENER)
}

pub fn connect(id: PairId) -> Token {
    Token(KIND_CONNECT | pair_bits(id))
}

pub fn relay(id: PairId, side: Side) -> Token {
    let side_bit = match side {
        Side::Client => 0,
        Side::Upstream => SIDE_BIT,
    };
    Token(KIND_RELAY | side_bit | pair_bits(id))
}

/// `None` for a token this crate never issued.
pub fn decode(token: Token) -> Option<Target> {
    let id = PairId::from_parts(
        (token.0 & IDX_MASK) as u32,
        ((token.0 & GEN_MASK) >> GEN_SHIFT) as u16,
    );
    match token.0 & KIND_MASK {
        KIND_LISTENER => Some(Target::Listener),
        KIND_CONNECT => Some(Target::Connect(id)),
        KIND_RELAY => {
            let side = if token.0 & SIDE_BIT != 0 {
                Side::Upstream
            } else {
                Side::Client
            };
            Some(Target::Relay(id, side))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_issued_tokens() {
        let id = PairId::from_parts(0xDEAD_BEEF, 0xABCD);
        assert_eq!(decode(listener()), Some(Target::Listener));
        assert_eq!(decode(connect(id)), Some(Target::Connect(id)));
        assert_eq!(
            decode(relay(id, Side::Client)),
            Some(Target::Relay(id, Side::Client))
        );
        assert_eq!(
            decode(relay(id, Side::Upstream)),
            Some(Target::Relay(id, Side::Upstream))
        );
    }

    #[test]
    fn test_tokens_are_distinct() {
        let id = PairId::from_parts(7, 1);
        let newer = PairId::from_parts(7, 2);
        assert_ne!(connect(id), relay(id, Side::Client));
        assert_ne!(relay(id, Side::Client), relay(id, Side::Upstream));
        assert_ne!(relay(id, Side::Client), relay(newer, Side::Client));
    }

    #[test]
    fn test_foreign_token() {
        assert_eq!(decode(Token(0)), None);
        assert_eq!(decode(Token(9 << 56)), None);
    }
}
