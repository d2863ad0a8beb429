use btcswap_sdk::bitcoin::hashes::Hash as _;
use btcswap_sdk::bitcoin::script::{Builder, Instruction, PushBytesBuf};
use btcswap_sdk::bitcoin::{Address, PublicKey, Script, ScriptBuf, Sequence, Txid};
use btcswap_sdk::testing::test_key;
use btcswap_sdk::{
    ChainTip, ClaimParams, Error, FundingParams, HtlcKind, HtlcParams, HtlcScript, RefundParams,
    Secret, SpendPath, SwapOrder, Utxo, WalletKey, build_claim_tx, build_funding_tx,
    build_refund_tx, extract_secret, relative_sequence, verify_htlc_input,
};

// ── Helpers ──────────────────────────────────────────────────────────────

const FUNDED_AT: u32 = 1_700_000_000;

fn htlc_for(order: &SwapOrder, kind: HtlcKind, refund: &WalletKey) -> HtlcScript {
    let (withdrawal, cancellation) = match kind {
        HtlcKind::Destination { .. } => (0, 850_000),
        _ => (512, 3_584),
    };
    HtlcScript::new(HtlcParams {
        order_hash: order.order_hash,
        hash_lock: order.hash_lock.sha256,
        withdrawal_delay: withdrawal,
        cancellation_delay: cancellation,
        lock_till_withdrawal: false,
        refund_pubkey: refund.public_key(),
        kind,
    })
    .unwrap()
}

fn generic(claimer: &WalletKey) -> HtlcKind {
    HtlcKind::Generic {
        claim_pubkey: claimer.public_key(),
    }
}

fn utxo(value: u64, n: u8) -> Utxo {
    Utxo {
        txid: Txid::from_byte_array([n; 32]),
        vout: 0,
        value,
        block_height: Some(800_000),
    }
}

fn destination() -> Address {
    test_key(9).address()
}

fn claim(
    htlc: &HtlcScript,
    secret: &Secret,
    claimer: &WalletKey,
) -> btcswap_sdk::Result<btcswap_sdk::BuiltTransaction> {
    let dest = destination();
    build_claim_tx(&ClaimParams {
        htlc,
        utxo: &utxo(100_000, 7),
        secret,
        claimer,
        destination: &dest,
        fee: 1_000,
    })
}

/// Rebuild a scriptSig, letting `edit` replace individual data pushes.
fn rewrite_pushes(script: &Script, edit: impl Fn(usize, Vec<u8>) -> Vec<u8>) -> ScriptBuf {
    let mut builder = Builder::new();
    for (i, instruction) in script.instructions().enumerate() {
        builder = match instruction.unwrap() {
            Instruction::PushBytes(bytes) => {
                let data = edit(i, bytes.as_bytes().to_vec());
                builder.push_slice(PushBytesBuf::try_from(data).unwrap())
            }
            Instruction::Op(op) => builder.push_opcode(op),
        };
    }
    builder.into_script()
}

// ── Funding ──────────────────────────────────────────────────────────────

#[test]
fn funding_pays_htlc_and_returns_change() {
    let payer = test_key(3);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&test_key(1)), &payer);
    let utxos = [utxo(60_000, 1), utxo(60_000, 2), utxo(60_000, 3)];

    let built = build_funding_tx(&FundingParams {
        payer: &payer,
        utxos: &utxos,
        htlc: &htlc,
        amount: 100_000,
        fee: 10_000,
    })
    .unwrap();

    assert_eq!(built.tx.input.len(), 2);
    assert_eq!(built.tx.output.len(), 2);
    assert_eq!(built.tx.output[0].value.to_sat(), 100_000);
    assert_eq!(built.tx.output[0].script_pubkey, htlc.script_pubkey());
    assert_eq!(built.tx.output[1].value.to_sat(), 10_000);
    assert_eq!(built.tx.output[1].script_pubkey, payer.script_pubkey());
    assert_eq!(built.change, 10_000);
    assert_eq!(built.fee, 10_000);
    assert_eq!(built.txid, built.tx.compute_txid());
    for input in &built.tx.input {
        assert_eq!(input.witness.len(), 2);
        assert!(input.script_sig.is_empty());
    }
}

#[test]
fn dust_change_goes_to_fee() {
    let payer = test_key(3);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&test_key(1)), &payer);

    let built = build_funding_tx(&FundingParams {
        payer: &payer,
        utxos: &[utxo(110_300, 1)],
        htlc: &htlc,
        amount: 100_000,
        fee: 10_000,
    })
    .unwrap();

    assert_eq!(built.tx.output.len(), 1);
    assert_eq!(built.fee, 10_300);
    assert_eq!(built.change, 0);
}

#[test]
fn insufficient_funds_fails_before_signing() {
    let payer = test_key(3);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&test_key(1)), &payer);

    let err = build_funding_tx(&FundingParams {
        payer: &payer,
        utxos: &[utxo(50_000, 1)],
        htlc: &htlc,
        amount: 100_000,
        fee: 10_000,
    })
    .unwrap_err();

    match err {
        Error::InsufficientFunds { needed, available } => {
            assert_eq!(needed, 110_000);
            assert_eq!(available, 50_000);
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ── Claim ────────────────────────────────────────────────────────────────

#[test]
fn claim_reveals_secret_and_pays_value_minus_fee() {
    let claimer = test_key(1);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&claimer), &test_key(2));

    let built = claim(&htlc, &order.secret, &claimer).unwrap();
    assert_eq!(built.tx.output.len(), 1);
    assert_eq!(built.tx.output[0].value.to_sat(), 99_000);
    assert_eq!(built.tx.output[0].script_pubkey, destination().script_pubkey());
    assert_eq!(
        verify_htlc_input(&built.tx, 0, htlc.script()).unwrap(),
        SpendPath::Claim
    );

    // [sig, secret, OP_TRUE, redeem]
    let elements: Vec<_> = built.tx.input[0]
        .script_sig
        .instructions()
        .map(|i| i.unwrap())
        .collect();
    assert_eq!(elements.len(), 4);
    match &elements[1] {
        Instruction::PushBytes(b) => assert_eq!(b.as_bytes(), order.secret.as_bytes()),
        other => panic!("unexpected {other:?}"),
    }

    let revealed = extract_secret(&built.tx, &htlc).unwrap().unwrap();
    assert_eq!(revealed, order.secret);
}

#[test]
fn wrong_preimage_does_not_satisfy_hashlock() {
    let claimer = test_key(1);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&claimer), &test_key(2));

    assert!(matches!(
        claim(&htlc, &Secret::from_bytes([0x42; 32]), &claimer),
        Err(Error::SecretMismatch)
    ));

    // Swap the preimage in an otherwise valid claim.
    let mut tx = claim(&htlc, &order.secret, &claimer).unwrap().tx;
    tx.input[0].script_sig = rewrite_pushes(&tx.input[0].script_sig, |i, data| {
        if i == 1 { vec![0x42; 32] } else { data }
    });
    assert!(matches!(
        verify_htlc_input(&tx, 0, htlc.script()),
        Err(Error::Evaluation(_))
    ));
}

#[test]
fn claim_requires_the_claim_key() {
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&test_key(1)), &test_key(2));
    assert!(matches!(
        claim(&htlc, &order.secret, &test_key(5)),
        Err(Error::KeyMismatch(_))
    ));
}

#[test]
fn pinned_claim_pushes_pubkey() {
    let claimer = test_key(1);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(
        &order,
        HtlcKind::RecipientPinned {
            recipient: claimer.pubkey_hash(),
        },
        &test_key(2),
    );

    let built = claim(&htlc, &order.secret, &claimer).unwrap();
    let elements: Vec<_> = built.tx.input[0]
        .script_sig
        .instructions()
        .map(|i| i.unwrap())
        .collect();
    // [sig, pubkey, secret, OP_TRUE, redeem]
    assert_eq!(elements.len(), 5);
    match &elements[1] {
        Instruction::PushBytes(b) => {
            assert_eq!(PublicKey::from_slice(b.as_bytes()).unwrap(), claimer.public_key())
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(extract_secret(&built.tx, &htlc).unwrap(), Some(order.secret.clone()));

    assert!(matches!(
        claim(&htlc, &order.secret, &test_key(5)),
        Err(Error::KeyMismatch(_))
    ));
}

#[test]
fn destination_claim_does_not_need_lock_time() {
    let claimer = test_key(1);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(
        &order,
        HtlcKind::Destination {
            claim_pubkey: claimer.public_key(),
        },
        &test_key(2),
    );
    let built = claim(&htlc, &order.secret, &claimer).unwrap();
    assert_eq!(built.tx.lock_time.to_consensus_u32(), 0);
    assert_eq!(built.tx.input[0].sequence, Sequence::ENABLE_LOCKTIME_NO_RBF);
}

// ── Refund ───────────────────────────────────────────────────────────────

fn refund_at(
    htlc: &HtlcScript,
    refunder: &WalletKey,
    tip: ChainTip,
) -> btcswap_sdk::Result<btcswap_sdk::BuiltTransaction> {
    let dest = destination();
    build_refund_tx(&RefundParams {
        htlc,
        utxo: &utxo(100_000, 7),
        refunder,
        destination: &dest,
        fee: 1_000,
        tip,
        funding_confirmed_at: Some(FUNDED_AT),
    })
}

#[test]
fn relative_refund_only_after_cancellation_delay() {
    let refunder = test_key(2);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&test_key(1)), &refunder);

    let early = ChainTip {
        height: 800_005,
        median_time: FUNDED_AT + 3_583,
    };
    assert!(matches!(
        refund_at(&htlc, &refunder, early),
        Err(Error::TimelockNotElapsed(_))
    ));

    let late = ChainTip {
        height: 800_010,
        median_time: FUNDED_AT + 3_584,
    };
    let built = refund_at(&htlc, &refunder, late).unwrap();
    assert_eq!(built.tx.input[0].sequence, relative_sequence(3_584).unwrap());
    assert_eq!(built.tx.output[0].value.to_sat(), 99_000);
    assert_eq!(
        verify_htlc_input(&built.tx, 0, htlc.script()).unwrap(),
        SpendPath::Refund
    );
    assert_eq!(extract_secret(&built.tx, &htlc).unwrap(), None);
}

#[test]
fn refund_with_short_sequence_fails_evaluation() {
    let refunder = test_key(2);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&test_key(1)), &refunder);
    let late = ChainTip {
        height: 800_010,
        median_time: FUNDED_AT + 10_000,
    };
    let mut tx = refund_at(&htlc, &refunder, late).unwrap().tx;
    tx.input[0].sequence = relative_sequence(512).unwrap();
    assert!(verify_htlc_input(&tx, 0, htlc.script()).is_err());
}

#[test]
fn absolute_refund_sets_lock_time() {
    let refunder = test_key(2);
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(
        &order,
        HtlcKind::Destination {
            claim_pubkey: test_key(1).public_key(),
        },
        &refunder,
    );

    let early = ChainTip {
        height: 849_999,
        median_time: FUNDED_AT,
    };
    assert!(refund_at(&htlc, &refunder, early).is_err());

    let late = ChainTip {
        height: 850_000,
        median_time: FUNDED_AT,
    };
    let built = refund_at(&htlc, &refunder, late).unwrap();
    assert_eq!(built.tx.lock_time.to_consensus_u32(), 850_000);
    assert_ne!(built.tx.input[0].sequence, Sequence::MAX);
    assert_eq!(
        verify_htlc_input(&built.tx, 0, htlc.script()).unwrap(),
        SpendPath::Refund
    );
}

#[test]
fn refund_requires_the_refund_key() {
    let order = SwapOrder::create(100_000, 1);
    let htlc = htlc_for(&order, generic(&test_key(1)), &test_key(2));
    let late = ChainTip {
        height: 800_010,
        median_time: FUNDED_AT + 10_000,
    };
    assert!(matches!(
        refund_at(&htlc, &test_key(1), late),
        Err(Error::KeyMismatch(_))
    ));
}

#[test]
fn spend_below_dust_is_refused() {
    let claimer = test_key(1);
    let order = SwapOrder::create(1_200, 1);
    let htlc = htlc_for(&order, generic(&claimer), &test_key(2));
    let dest = destination();
    let result = build_claim_tx(&ClaimParams {
        htlc: &htlc,
        utxo: &utxo(1_200, 7),
        secret: &order.secret,
        claimer: &claimer,
        destination: &dest,
        fee: 1_000,
    });
    assert!(matches!(result, Err(Error::Dust(_))));
}
