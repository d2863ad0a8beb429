//! HTLC redeem scripts for both swap legs.
//!
//! Three templates share one shape: an order-hash tag, an optional
//! withdrawal timelock gate, a hashlock branch and a timelocked refund branch.
//!
//! ```text
//! <orderHash> DROP
//! [<withdrawal> CSV|CLTV DROP]
//! IF
//!     SHA256 <hashLock> EQUALVERIFY <claimerPubKey> CHECKSIG
//!     | SHA256 <hashLock> EQUALVERIFY DUP HASH160 <recipientPkh> EQUALVERIFY CHECKSIG
//! ELSE
//!     <cancellation> CSV|CLTV DROP <refundPubKey> CHECKSIG
//! ENDIF
//! ```
//!
//! Source-leg scripts use relative (BIP-68/112) timelocks expressed in
//! seconds; destination-leg scripts use absolute (BIP-65) lock times.

use bitcoin::hashes::Hash as _;
use bitcoin::opcodes::Opcode;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_CSV, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160,
    OP_IF, OP_PUSHNUM_1, OP_PUSHNUM_16, OP_PUSHNUM_NEG1, OP_SHA256,
};
use bitcoin::script::{Builder, Instruction};
use bitcoin::{Address, PubkeyHash, PublicKey, Script, ScriptBuf, Sequence, absolute};

use crate::address;
use crate::chain::ChainTip;
use crate::error::{Error, Result};
use crate::network::Network;

/// BIP-68 flag selecting time-based (512 s granularity) relative locks.
pub const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;
/// BIP-68 granularity of time-based relative locks.
pub const SEQUENCE_GRANULARITY_SECS: u32 = 512;
const SEQUENCE_VALUE_MASK: u32 = 0x0000_ffff;
/// `nLockTime` values below this are block heights, above are UNIX times.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelockKind {
    /// `CHECKSEQUENCEVERIFY`, delay in seconds.
    Relative,
    /// `CHECKLOCKTIMEVERIFY`, raw `nLockTime`.
    Absolute,
}

impl TimelockKind {
    fn opcode(self) -> Opcode {
        match self {
            TimelockKind::Relative => OP_CSV,
            TimelockKind::Absolute => OP_CLTV,
        }
    }
}

/// Which template the script follows, with the data that differs between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtlcKind {
    /// Source leg: the claimer's key signs the hashlock branch.
    Generic { claim_pubkey: PublicKey },
    /// Source leg where any key hashing to `recipient` may claim.
    RecipientPinned { recipient: PubkeyHash },
    /// Destination leg: like `Generic` but with absolute timelocks.
    Destination { claim_pubkey: PublicKey },
}

impl HtlcKind {
    pub fn timelock(&self) -> TimelockKind {
        match self {
            HtlcKind::Generic { .. } | HtlcKind::RecipientPinned { .. } => TimelockKind::Relative,
            HtlcKind::Destination { .. } => TimelockKind::Absolute,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HtlcKind::Generic { .. } => "generic",
            HtlcKind::RecipientPinned { .. } => "recipient-pinned",
            HtlcKind::Destination { .. } => "destination",
        }
    }
}

/// Everything that determines an HTLC script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcParams {
    pub order_hash: [u8; 32],
    /// SHA-256 of the swap secret.
    pub hash_lock: [u8; 32],
    /// Seconds (relative kinds) or `nLockTime` (destination) before the
    /// hashlock branch opens. Only enforced when `lock_till_withdrawal` is set.
    pub withdrawal_delay: u32,
    /// Seconds (relative kinds) or `nLockTime` (destination) before refund.
    pub cancellation_delay: u32,
    pub lock_till_withdrawal: bool,
    pub refund_pubkey: PublicKey,
    pub kind: HtlcKind,
}

impl HtlcParams {
    pub fn validate(&self) -> Result<()> {
        match self.kind.timelock() {
            TimelockKind::Relative => {
                if self.lock_till_withdrawal {
                    relative_sequence(self.withdrawal_delay)?;
                }
                relative_sequence(self.cancellation_delay)?;
            }
            TimelockKind::Absolute => {
                if self.lock_till_withdrawal
                    && (self.withdrawal_delay < LOCKTIME_THRESHOLD)
                        != (self.cancellation_delay < LOCKTIME_THRESHOLD)
                {
                    return Err(Error::InvalidTimelock(
                        "withdrawal and cancellation lock times mix heights and timestamps".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Script number pushed for a delay of this kind.
    fn encode_delay(&self, delay: u32) -> Result<i64> {
        match self.kind.timelock() {
            TimelockKind::Relative => Ok(relative_sequence(delay)?.0 as i64),
            TimelockKind::Absolute => Ok(delay as i64),
        }
    }

    /// The delay that has to pass before the refund branch is spendable.
    fn refund_delay(&self) -> u32 {
        if self.lock_till_withdrawal {
            self.cancellation_delay.max(self.withdrawal_delay)
        } else {
            self.cancellation_delay
        }
    }
}

/// BIP-68 time-based sequence for a relative delay in seconds.
///
/// The delay must be a multiple of 512 seconds and fit in 16 bits of
/// 512-second intervals.
pub fn relative_sequence(seconds: u32) -> Result<Sequence> {
    if seconds % SEQUENCE_GRANULARITY_SECS != 0 {
        return Err(Error::InvalidTimelock(format!(
            "relative delay {seconds}s is not a multiple of {SEQUENCE_GRANULARITY_SECS}s"
        )));
    }
    let intervals = seconds / SEQUENCE_GRANULARITY_SECS;
    let intervals = u16::try_from(intervals).map_err(|_| {
        Error::InvalidTimelock(format!("relative delay {seconds}s exceeds the BIP-68 range"))
    })?;
    Ok(Sequence::from_512_second_intervals(intervals))
}

/// Inverse of [`relative_sequence`] for values read back out of a script.
fn relative_seconds(value: i64) -> Result<u32> {
    let raw = u32::try_from(value)
        .map_err(|_| Error::InvalidScript(format!("relative lock {value} out of range")))?;
    if raw & SEQUENCE_TYPE_FLAG == 0 || raw & !(SEQUENCE_TYPE_FLAG | SEQUENCE_VALUE_MASK) != 0 {
        return Err(Error::InvalidScript(format!(
            "relative lock {raw:#x} is not a time-based BIP-68 value"
        )));
    }
    Ok((raw & SEQUENCE_VALUE_MASK) * SEQUENCE_GRANULARITY_SECS)
}

/// Decode a little-endian sign-magnitude script number of up to 5 bytes.
pub(crate) fn decode_script_num(bytes: &[u8]) -> Option<i64> {
    if bytes.len() > 5 {
        return None;
    }
    let Some(&last) = bytes.last() else {
        return Some(0);
    };
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= (*b as i64) << (8 * i);
    }
    if last & 0x80 != 0 {
        value &= !(0x80_i64 << (8 * (bytes.len() - 1)));
        value = -value;
    }
    Some(value)
}

/// `nSequence` / `nLockTime` a spending input must carry for one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendTiming {
    pub sequence: Sequence,
    pub lock_time: absolute::LockTime,
}

/// A compiled HTLC script, ready for address derivation and spending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcScript {
    params: HtlcParams,
    script: ScriptBuf,
}

impl HtlcScript {
    /// Compile the script for `params`. Pure and deterministic.
    pub fn new(params: HtlcParams) -> Result<Self> {
        params.validate()?;
        let timelock_op = params.kind.timelock().opcode();

        let mut builder = Builder::new()
            .push_slice(params.order_hash)
            .push_opcode(OP_DROP);

        if params.lock_till_withdrawal {
            builder = builder
                .push_int(params.encode_delay(params.withdrawal_delay)?)
                .push_opcode(timelock_op)
                .push_opcode(OP_DROP);
        }

        builder = builder
            .push_opcode(OP_IF)
            .push_opcode(OP_SHA256)
            .push_slice(params.hash_lock)
            .push_opcode(OP_EQUALVERIFY);

        builder = match params.kind {
            HtlcKind::Generic { claim_pubkey } | HtlcKind::Destination { claim_pubkey } => {
                builder.push_key(&claim_pubkey)
            }
            HtlcKind::RecipientPinned { recipient } => builder
                .push_opcode(OP_DUP)
                .push_opcode(OP_HASH160)
                .push_slice(recipient.to_byte_array())
                .push_opcode(OP_EQUALVERIFY),
        };

        let script = builder
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_int(params.encode_delay(params.cancellation_delay)?)
            .push_opcode(timelock_op)
            .push_opcode(OP_DROP)
            .push_key(&params.refund_pubkey)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .into_script();

        if script.len() > address::MAX_REDEEM_SCRIPT_SIZE {
            return Err(Error::InvalidScript(format!(
                "redeem script is {} bytes",
                script.len()
            )));
        }

        Ok(Self { params, script })
    }

    /// Parse a script back into its parameters. Anything that is not one of
    /// the three templates, byte for byte, is rejected.
    pub fn parse(script: &Script) -> Result<Self> {
        let mut tokens = Tokens::read(script)?;

        let order_hash = tokens.data::<32>()?;
        tokens.op(OP_DROP)?;

        let gate = if tokens.peek_is(OP_IF) {
            None
        } else {
            let value = tokens.num()?;
            let op = tokens.timelock_op()?;
            tokens.op(OP_DROP)?;
            Some((value, op))
        };

        tokens.op(OP_IF)?;
        tokens.op(OP_SHA256)?;
        let hash_lock = tokens.data::<32>()?;
        tokens.op(OP_EQUALVERIFY)?;

        let pinned = if tokens.peek_is(OP_DUP) {
            tokens.op(OP_DUP)?;
            tokens.op(OP_HASH160)?;
            let pkh = tokens.data::<20>()?;
            tokens.op(OP_EQUALVERIFY)?;
            Some(PubkeyHash::from_byte_array(pkh))
        } else {
            None
        };
        let claim_pubkey = match pinned {
            Some(_) => None,
            None => Some(tokens.pubkey()?),
        };

        tokens.op(OP_CHECKSIG)?;
        tokens.op(OP_ELSE)?;
        let cancellation_raw = tokens.num()?;
        let cancel_op = tokens.timelock_op()?;
        tokens.op(OP_DROP)?;
        let refund_pubkey = tokens.pubkey()?;
        tokens.op(OP_CHECKSIG)?;
        tokens.op(OP_ENDIF)?;
        tokens.end()?;

        if let Some((_, op)) = gate
            && op != cancel_op
        {
            return Err(Error::InvalidScript(
                "withdrawal and cancellation use different timelock opcodes".into(),
            ));
        }

        let kind = match (claim_pubkey, pinned, cancel_op == OP_CSV) {
            (Some(claim_pubkey), None, true) => HtlcKind::Generic { claim_pubkey },
            (Some(claim_pubkey), None, false) => HtlcKind::Destination { claim_pubkey },
            (None, Some(recipient), true) => HtlcKind::RecipientPinned { recipient },
            _ => {
                return Err(Error::InvalidScript(
                    "recipient-pinned scripts must use relative timelocks".into(),
                ));
            }
        };

        let decode = |value: i64| -> Result<u32> {
            match kind.timelock() {
                TimelockKind::Relative => relative_seconds(value),
                TimelockKind::Absolute => u32::try_from(value)
                    .map_err(|_| Error::InvalidScript(format!("lock time {value} out of range"))),
            }
        };

        let params = HtlcParams {
            order_hash,
            hash_lock,
            withdrawal_delay: match gate {
                Some((value, _)) => decode(value)?,
                None => 0,
            },
            cancellation_delay: decode(cancellation_raw)?,
            lock_till_withdrawal: gate.is_some(),
            refund_pubkey,
            kind,
        };

        // Recompiling rejects non-minimal pushes and other encodings that
        // tokenize the same but differ on the wire.
        let compiled = Self::new(params)?;
        if compiled.script.as_script() != script {
            return Err(Error::InvalidScript("non-canonical script encoding".into()));
        }
        Ok(compiled)
    }

    pub fn params(&self) -> &HtlcParams {
        &self.params
    }

    pub fn kind(&self) -> &HtlcKind {
        &self.params.kind
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.script.as_bytes())
    }

    /// P2SH output script paying to this HTLC.
    pub fn script_pubkey(&self) -> ScriptBuf {
        address::expected_script_pubkey(&self.script)
    }

    pub fn address(&self, network: Network) -> Result<Address> {
        address::derive_address(&self.script, network)
    }

    /// Sequence and lock time a claim input needs.
    pub fn claim_timing(&self) -> Result<SpendTiming> {
        let p = &self.params;
        match p.kind.timelock() {
            TimelockKind::Relative => Ok(SpendTiming {
                sequence: if p.lock_till_withdrawal {
                    relative_sequence(p.withdrawal_delay)?
                } else {
                    Sequence::ENABLE_RBF_NO_LOCKTIME
                },
                lock_time: absolute::LockTime::ZERO,
            }),
            TimelockKind::Absolute => Ok(SpendTiming {
                sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
                lock_time: if p.lock_till_withdrawal {
                    absolute::LockTime::from_consensus(p.withdrawal_delay)
                } else {
                    absolute::LockTime::ZERO
                },
            }),
        }
    }

    /// Sequence and lock time a refund input needs.
    pub fn refund_timing(&self) -> Result<SpendTiming> {
        let delay = self.params.refund_delay();
        match self.params.kind.timelock() {
            TimelockKind::Relative => Ok(SpendTiming {
                sequence: relative_sequence(delay)?,
                lock_time: absolute::LockTime::ZERO,
            }),
            TimelockKind::Absolute => Ok(SpendTiming {
                sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
                lock_time: absolute::LockTime::from_consensus(delay),
            }),
        }
    }

    /// Check the refund branch is spendable at `tip`.
    ///
    /// Relative scripts count from `funding_confirmed_at`, the block time of
    /// the block that confirmed the funding output; an unconfirmed output is
    /// never refundable.
    pub fn ensure_refund_mature(
        &self,
        tip: &ChainTip,
        funding_confirmed_at: Option<u32>,
    ) -> Result<()> {
        let delay = self.params.refund_delay();
        match self.params.kind.timelock() {
            TimelockKind::Relative => {
                let confirmed_at = funding_confirmed_at.ok_or_else(|| {
                    Error::TimelockNotElapsed("funding output is unconfirmed".into())
                })?;
                let elapsed = tip.median_time.saturating_sub(confirmed_at);
                if elapsed < delay {
                    return Err(Error::TimelockNotElapsed(format!(
                        "{elapsed}s of {delay}s elapsed since funding confirmed"
                    )));
                }
            }
            TimelockKind::Absolute => {
                if delay < LOCKTIME_THRESHOLD {
                    if tip.height < delay {
                        return Err(Error::TimelockNotElapsed(format!(
                            "tip height {} below lock height {delay}",
                            tip.height
                        )));
                    }
                } else if tip.median_time < delay {
                    return Err(Error::TimelockNotElapsed(format!(
                        "median time {} below lock time {delay}",
                        tip.median_time
                    )));
                }
            }
        }
        Ok(())
    }
}

// ── Tokenizer ───────────────────────────────────────────────────────

enum Token {
    Push(Vec<u8>),
    Op(Opcode),
}

struct Tokens {
    tokens: Vec<Token>,
    pos: usize,
}

impl Tokens {
    fn read(script: &Script) -> Result<Self> {
        let mut tokens = Vec::new();
        for instruction in script.instructions() {
            let instruction =
                instruction.map_err(|e| Error::InvalidScript(format!("undecodable: {e}")))?;
            tokens.push(match instruction {
                Instruction::PushBytes(bytes) => Token::Push(bytes.as_bytes().to_vec()),
                Instruction::Op(op) => Token::Op(op),
            });
        }
        Ok(Self { tokens, pos: 0 })
    }

    fn next(&mut self, expected: &str) -> Result<&Token> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| Error::InvalidScript(format!("script ends before {expected}")))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_is(&self, op: Opcode) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Op(o)) if *o == op)
    }

    fn op(&mut self, op: Opcode) -> Result<()> {
        let pos = self.pos;
        match self.next("opcode")? {
            Token::Op(o) if *o == op => Ok(()),
            _ => Err(Error::InvalidScript(format!("expected {op} at token {pos}"))),
        }
    }

    fn timelock_op(&mut self) -> Result<Opcode> {
        let pos = self.pos;
        match self.next("timelock opcode")? {
            Token::Op(o) if *o == OP_CSV || *o == OP_CLTV => Ok(*o),
            _ => Err(Error::InvalidScript(format!(
                "expected CSV or CLTV at token {pos}"
            ))),
        }
    }

    fn data<const N: usize>(&mut self) -> Result<[u8; N]> {
        let pos = self.pos;
        match self.next("data push")? {
            Token::Push(bytes) => bytes.as_slice().try_into().map_err(|_| {
                Error::InvalidScript(format!(
                    "expected {N}-byte push at token {pos}, got {} bytes",
                    bytes.len()
                ))
            }),
            Token::Op(_) => Err(Error::InvalidScript(format!(
                "expected {N}-byte push at token {pos}"
            ))),
        }
    }

    fn pubkey(&mut self) -> Result<PublicKey> {
        let pos = self.pos;
        match self.next("public key")? {
            Token::Push(bytes) => PublicKey::from_slice(bytes)
                .map_err(|e| Error::InvalidScript(format!("bad public key at token {pos}: {e}"))),
            Token::Op(_) => Err(Error::InvalidScript(format!(
                "expected public key at token {pos}"
            ))),
        }
    }

    fn num(&mut self) -> Result<i64> {
        let pos = self.pos;
        match self.next("number")? {
            Token::Push(bytes) => decode_script_num(bytes)
                .ok_or_else(|| Error::InvalidScript(format!("number too long at token {pos}"))),
            Token::Op(o) if *o == OP_PUSHNUM_NEG1 => Ok(-1),
            Token::Op(o)
                if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&o.to_u8()) =>
            {
                Ok((o.to_u8() - OP_PUSHNUM_1.to_u8() + 1) as i64)
            }
            Token::Op(_) => Err(Error::InvalidScript(format!(
                "expected number at token {pos}"
            ))),
        }
    }

    fn end(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(Error::InvalidScript(format!(
                "{} trailing tokens",
                self.tokens.len() - self.pos
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(byte: u8) -> PublicKey {
        use bitcoin::secp256k1::{Secp256k1, SecretKey};
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey::new(sk.public_key(&secp))
    }

    fn generic(gate: bool) -> HtlcParams {
        HtlcParams {
            order_hash: [0x0a; 32],
            hash_lock: [0x0b; 32],
            withdrawal_delay: 512,
            cancellation_delay: 1024,
            lock_till_withdrawal: gate,
            refund_pubkey: pk(2),
            kind: HtlcKind::Generic {
                claim_pubkey: pk(1),
            },
        }
    }

    #[test]
    fn relative_sequence_encoding() {
        assert_eq!(relative_sequence(512).unwrap().0, SEQUENCE_TYPE_FLAG | 1);
        assert_eq!(relative_sequence(1024).unwrap().0, SEQUENCE_TYPE_FLAG | 2);
        assert_eq!(relative_sequence(0).unwrap().0, SEQUENCE_TYPE_FLAG);
        assert!(relative_sequence(600).is_err());
        assert!(relative_sequence(512 * 0x1_0000).is_err());
    }

    #[test]
    fn script_num_decoding() {
        assert_eq!(decode_script_num(&[]), Some(0));
        assert_eq!(decode_script_num(&[0x01, 0x00, 0x40]), Some(0x40_0001));
        assert_eq!(decode_script_num(&[0x81]), Some(-1));
        assert_eq!(decode_script_num(&[0xff, 0xff, 0xff, 0xff, 0x00]), Some(0xffff_ffff));
        assert_eq!(decode_script_num(&[0; 6]), None);
    }

    #[test]
    fn generic_layout() {
        let htlc = HtlcScript::new(generic(false)).unwrap();
        let bytes = htlc.script().as_bytes();
        // <32-byte orderHash> DROP IF SHA256 ...
        assert_eq!(bytes[0], 0x20);
        assert_eq!(&bytes[1..33], &[0x0a; 32]);
        assert_eq!(bytes[33], OP_DROP.to_u8());
        assert_eq!(bytes[34], OP_IF.to_u8());
        assert_eq!(bytes[35], OP_SHA256.to_u8());
        assert_eq!(*bytes.last().unwrap(), OP_ENDIF.to_u8());
    }

    #[test]
    fn gate_adds_withdrawal_lock() {
        let plain = HtlcScript::new(generic(false)).unwrap();
        let gated = HtlcScript::new(generic(true)).unwrap();
        let bytes = gated.script().as_bytes();
        // 3-byte push of 0x400001, then CSV DROP
        assert_eq!(&bytes[34..38], &[0x03, 0x01, 0x00, 0x40]);
        assert_eq!(bytes[38], OP_CSV.to_u8());
        assert_eq!(bytes[39], OP_DROP.to_u8());
        assert_eq!(gated.script().len(), plain.script().len() + 6);
    }

    #[test]
    fn destination_uses_cltv() {
        let params = HtlcParams {
            withdrawal_delay: 800_000,
            cancellation_delay: 800_144,
            kind: HtlcKind::Destination {
                claim_pubkey: pk(1),
            },
            ..generic(true)
        };
        let htlc = HtlcScript::new(params).unwrap();
        let bytes = htlc.script().as_bytes();
        assert!(bytes.contains(&OP_CLTV.to_u8()));
        assert!(!bytes.contains(&OP_CSV.to_u8()));
    }

    #[test]
    fn destination_rejects_mixed_units() {
        let params = HtlcParams {
            withdrawal_delay: 800_000,
            cancellation_delay: 1_700_000_000,
            kind: HtlcKind::Destination {
                claim_pubkey: pk(1),
            },
            ..generic(true)
        };
        assert!(matches!(
            HtlcScript::new(params),
            Err(Error::InvalidTimelock(_))
        ));
    }

    #[test]
    fn relative_rejects_unaligned_delay() {
        let params = HtlcParams {
            cancellation_delay: 1000,
            ..generic(false)
        };
        assert!(matches!(
            HtlcScript::new(params),
            Err(Error::InvalidTimelock(_))
        ));
    }

    #[test]
    fn parse_roundtrips_every_kind() {
        let pinned = HtlcParams {
            kind: HtlcKind::RecipientPinned {
                recipient: pk(3).pubkey_hash(),
            },
            ..generic(true)
        };
        let destination = HtlcParams {
            withdrawal_delay: 10,
            cancellation_delay: 20,
            kind: HtlcKind::Destination {
                claim_pubkey: pk(1),
            },
            ..generic(true)
        };
        for params in [generic(true), generic(false), pinned, destination] {
            let htlc = HtlcScript::new(params).unwrap();
            let parsed = HtlcScript::parse(htlc.script()).unwrap();
            assert_eq!(parsed.script(), htlc.script());
            assert_eq!(parsed.params().kind, params.kind);
            assert_eq!(parsed.params().cancellation_delay, params.cancellation_delay);
        }
    }

    #[test]
    fn parse_rejects_foreign_scripts() {
        let p2pkh = ScriptBuf::new_p2pkh(&pk(1).pubkey_hash());
        assert!(HtlcScript::parse(&p2pkh).is_err());

        let mut bytes = HtlcScript::new(generic(false)).unwrap().script().to_bytes();
        bytes.push(OP_DROP.to_u8());
        assert!(HtlcScript::parse(&ScriptBuf::from_bytes(bytes)).is_err());
    }

    #[test]
    fn claim_and_refund_timing() {
        let htlc = HtlcScript::new(generic(true)).unwrap();
        assert_eq!(
            htlc.claim_timing().unwrap().sequence,
            relative_sequence(512).unwrap()
        );
        assert_eq!(
            htlc.refund_timing().unwrap().sequence,
            relative_sequence(1024).unwrap()
        );

        let ungated = HtlcScript::new(generic(false)).unwrap();
        assert_eq!(
            ungated.claim_timing().unwrap().sequence,
            Sequence::ENABLE_RBF_NO_LOCKTIME
        );
    }

    #[test]
    fn relative_refund_maturity() {
        let htlc = HtlcScript::new(generic(false)).unwrap();
        let tip = ChainTip {
            height: 100,
            median_time: 10_000,
        };
        assert!(htlc.ensure_refund_mature(&tip, None).is_err());
        assert!(htlc.ensure_refund_mature(&tip, Some(9_000)).is_err());
        htlc.ensure_refund_mature(&tip, Some(8_976)).unwrap();
    }

    #[test]
    fn absolute_refund_maturity() {
        let params = HtlcParams {
            withdrawal_delay: 0,
            cancellation_delay: 150,
            lock_till_withdrawal: false,
            kind: HtlcKind::Destination {
                claim_pubkey: pk(1),
            },
            ..generic(false)
        };
        let htlc = HtlcScript::new(params).unwrap();
        let early = ChainTip {
            height: 149,
            median_time: 1_700_000_000,
        };
        let late = ChainTip {
            height: 150,
            median_time: 1_700_000_000,
        };
        assert!(matches!(
            htlc.ensure_refund_mature(&early, None),
            Err(Error::TimelockNotElapsed(_))
        ));
        htlc.ensure_refund_mature(&late, None).unwrap();
    }
}
