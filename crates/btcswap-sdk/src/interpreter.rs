//! Evaluator for HTLC spends.
//!
//! Runs a P2SH input's `scriptSig` against its redeem script with the subset
//! of consensus rules our templates rely on: data pushes, `IF/ELSE/ENDIF`,
//! `DROP`, `DUP`, `SHA256`, `HASH160`, `EQUALVERIFY`, legacy-sighash
//! `CHECKSIG`, and `CHECKSEQUENCEVERIFY` / `CHECKLOCKTIMEVERIFY`. Every claim
//! and refund is checked here before it leaves the builder.

use bitcoin::hashes::{Hash as _, hash160};
use bitcoin::opcodes::Opcode;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_CSV, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160,
    OP_IF, OP_PUSHNUM_1, OP_PUSHNUM_16, OP_PUSHNUM_NEG1, OP_SHA256,
};
use bitcoin::script::Instruction;
use bitcoin::secp256k1::{Message, Secp256k1, VerifyOnly};
use bitcoin::sighash::SighashCache;
use bitcoin::{Script, Sequence, Transaction, ecdsa};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::htlc::{LOCKTIME_THRESHOLD, SEQUENCE_TYPE_FLAG, decode_script_num};

const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// Which branch of the HTLC a valid spend took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendPath {
    Claim,
    Refund,
}

fn fail(msg: impl Into<String>) -> Error {
    Error::Evaluation(msg.into())
}

/// Evaluate input `index` of `tx` as a P2SH spend of `redeem_script`.
pub fn verify_htlc_input(
    tx: &Transaction,
    index: usize,
    redeem_script: &Script,
) -> Result<SpendPath> {
    let input = tx
        .input
        .get(index)
        .ok_or_else(|| fail(format!("input {index} does not exist")))?;

    let mut stack = push_only(&input.script_sig)?;
    let serialized = stack
        .pop()
        .ok_or_else(|| fail("empty scriptSig"))?;
    if serialized != redeem_script.as_bytes() {
        return Err(fail("scriptSig does not push the redeem script"));
    }

    let mut machine = Machine {
        tx,
        index,
        redeem_script,
        stack,
        exec: Vec::new(),
        path: None,
        secp: Secp256k1::verification_only(),
    };
    machine.run()?;

    match machine.stack.last() {
        Some(top) if cast_to_bool(top) => {}
        _ => return Err(fail("script evaluated to false")),
    }
    machine.path.ok_or_else(|| fail("no branch was taken"))
}

/// Stack elements of a push-only script.
pub(crate) fn push_only(script: &Script) -> Result<Vec<Vec<u8>>> {
    let mut stack = Vec::new();
    for instruction in script.instructions() {
        match instruction.map_err(|e| fail(format!("undecodable scriptSig: {e}")))? {
            Instruction::PushBytes(bytes) => stack.push(bytes.as_bytes().to_vec()),
            Instruction::Op(op) => stack.push(small_int(op).ok_or_else(|| {
                fail(format!("scriptSig is not push-only ({op})"))
            })?),
        }
    }
    Ok(stack)
}

fn small_int(op: Opcode) -> Option<Vec<u8>> {
    let code = op.to_u8();
    if op == OP_PUSHNUM_NEG1 {
        Some(vec![0x81])
    } else if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&code) {
        Some(vec![code - OP_PUSHNUM_1.to_u8() + 1])
    } else {
        None
    }
}

fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, b) in bytes.iter().enumerate() {
        if *b != 0 {
            // Negative zero is false.
            return !(i == bytes.len() - 1 && *b == 0x80);
        }
    }
    false
}

struct Machine<'a> {
    tx: &'a Transaction,
    index: usize,
    redeem_script: &'a Script,
    stack: Vec<Vec<u8>>,
    exec: Vec<bool>,
    path: Option<SpendPath>,
    secp: Secp256k1<VerifyOnly>,
}

impl Machine<'_> {
    fn pop(&mut self) -> Result<Vec<u8>> {
        self.stack.pop().ok_or_else(|| fail("stack underflow"))
    }

    fn top(&self) -> Result<&[u8]> {
        self.stack
            .last()
            .map(Vec::as_slice)
            .ok_or_else(|| fail("stack underflow"))
    }

    fn run(&mut self) -> Result<()> {
        for instruction in self.redeem_script.instructions() {
            let instruction =
                instruction.map_err(|e| fail(format!("undecodable redeem script: {e}")))?;
            let executing = self.exec.iter().all(|b| *b);

            let op = match instruction {
                Instruction::PushBytes(bytes) => {
                    if executing {
                        self.stack.push(bytes.as_bytes().to_vec());
                    }
                    continue;
                }
                Instruction::Op(op) => op,
            };

            if op == OP_IF {
                let taken = if executing {
                    let cond = cast_to_bool(&self.pop()?);
                    if self.path.is_none() {
                        self.path = Some(if cond { SpendPath::Claim } else { SpendPath::Refund });
                    }
                    cond
                } else {
                    false
                };
                self.exec.push(taken);
                continue;
            }
            if op == OP_ELSE {
                let last = self.exec.last_mut().ok_or_else(|| fail("ELSE without IF"))?;
                *last = !*last;
                continue;
            }
            if op == OP_ENDIF {
                self.exec.pop().ok_or_else(|| fail("ENDIF without IF"))?;
                continue;
            }
            if !executing {
                continue;
            }
            self.step(op)?;
        }

        if !self.exec.is_empty() {
            return Err(fail("unbalanced conditional"));
        }
        Ok(())
    }

    fn step(&mut self, op: Opcode) -> Result<()> {
        if let Some(num) = small_int(op) {
            self.stack.push(num);
        } else if op == OP_DROP {
            self.pop()?;
        } else if op == OP_DUP {
            let top = self.top()?.to_vec();
            self.stack.push(top);
        } else if op == OP_SHA256 {
            let data = self.pop()?;
            self.stack.push(Sha256::digest(&data).to_vec());
        } else if op == OP_HASH160 {
            let data = self.pop()?;
            self.stack
                .push(hash160::Hash::hash(&data).to_byte_array().to_vec());
        } else if op == OP_EQUALVERIFY {
            let a = self.pop()?;
            let b = self.pop()?;
            if a != b {
                return Err(fail("EQUALVERIFY failed"));
            }
        } else if op == OP_CHECKSIG {
            let pubkey = self.pop()?;
            let sig = self.pop()?;
            let ok = self.check_sig(&sig, &pubkey)?;
            self.stack.push(if ok { vec![1] } else { Vec::new() });
        } else if op == OP_CSV {
            let value = self.lock_operand()?;
            self.check_sequence(value)?;
        } else if op == OP_CLTV {
            let value = self.lock_operand()?;
            self.check_lock_time(value)?;
        } else {
            return Err(fail(format!("unsupported opcode {op}")));
        }
        Ok(())
    }

    fn lock_operand(&self) -> Result<i64> {
        let value = decode_script_num(self.top()?)
            .ok_or_else(|| fail("timelock operand longer than 5 bytes"))?;
        if value < 0 {
            return Err(fail("negative timelock"));
        }
        Ok(value)
    }

    fn check_sig(&self, sig: &[u8], pubkey: &[u8]) -> Result<bool> {
        if sig.is_empty() {
            return Ok(false);
        }
        let Ok(signature) = ecdsa::Signature::from_slice(sig) else {
            return Ok(false);
        };
        let Ok(pubkey) = bitcoin::PublicKey::from_slice(pubkey) else {
            return Ok(false);
        };
        let sighash = SighashCache::new(self.tx)
            .legacy_signature_hash(
                self.index,
                self.redeem_script,
                signature.sighash_type.to_u32(),
            )
            .map_err(|e| fail(format!("sighash: {e}")))?;
        let msg = Message::from_digest(sighash.to_byte_array());
        Ok(self
            .secp
            .verify_ecdsa(&msg, &signature.signature, &pubkey.inner)
            .is_ok())
    }

    // BIP-112
    fn check_sequence(&self, value: i64) -> Result<()> {
        let required = u32::try_from(value).unwrap_or(u32::MAX);
        if required & SEQUENCE_DISABLE_FLAG != 0 {
            return Ok(());
        }
        if self.tx.version.0 < 2 {
            return Err(fail("CSV requires transaction version 2"));
        }
        let sequence = self.tx.input[self.index].sequence.0;
        if sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return Err(fail("input sequence disables relative locks"));
        }
        let mask = SEQUENCE_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
        let (required, actual) = (required & mask, sequence & mask);
        if (required < SEQUENCE_TYPE_FLAG) != (actual < SEQUENCE_TYPE_FLAG) {
            return Err(fail("relative lock type mismatch"));
        }
        if required > actual {
            return Err(fail(format!(
                "input sequence {actual:#x} below required {required:#x}"
            )));
        }
        Ok(())
    }

    // BIP-65
    fn check_lock_time(&self, value: i64) -> Result<()> {
        let required =
            u32::try_from(value).map_err(|_| fail(format!("lock time {value} out of range")))?;
        let lock_time = self.tx.lock_time.to_consensus_u32();
        if (required < LOCKTIME_THRESHOLD) != (lock_time < LOCKTIME_THRESHOLD) {
            return Err(fail("lock time type mismatch"));
        }
        if required > lock_time {
            return Err(fail(format!(
                "transaction lock time {lock_time} below required {required}"
            )));
        }
        if self.tx.input[self.index].sequence == Sequence::MAX {
            return Err(fail("input is final, lock time not enforced"));
        }
        Ok(())
    }
}
