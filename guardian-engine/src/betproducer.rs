//! The core betting algorithm. `bet_at_height` turns the current set of
//! guardian opinions into this node's own probability estimate for one
//! height; `mkbet` drives that over every unsettled height and, when this
//! node is itself a guardian, emits a signed bet.
//!
//! `bet_at_height`'s weighting scheme is a deposit-weighted vote across
//! opinions' stated probabilities for the height, biased towards the
//! locally-known block when one is present, with `bravery` controlling
//! how quickly a strong majority saturates towards 0 or 1.

use std::collections::HashMap;

use crate::casper::CasperClient;
use crate::chainstore::ChainStore;
use crate::config::GuardianConfig;
use crate::crypto::HashVal;
use crate::error::EngineError;
use crate::network::{Message, NetworkHandle};
use crate::prob::{Prob, FINALITY_HIGH, FINALITY_LOW};
use crate::registry::GuardianRegistry;
use crate::staterecomp::StateTransition;

/// Per-height outcome of the betting strategy: this node's probability,
/// the block hash it currently prefers, and whether it should actively
/// request that block from the network.
pub struct HeightVote {
    pub prob: Prob,
    pub preferred_hash: HashVal,
    pub ask: bool,
}

/// Combines every guardian's opinion at height `h` into this node's own
/// vote. Guardians with no stated opinion at this height are ignored;
/// deposit size weights each guardian's vote, and a locally-known block
/// contributes a fixed baseline weight so a lone honest guardian is never
/// outvoted by silence.
pub fn bet_at_height(
    registry: &GuardianRegistry,
    h: u64,
    local_block: Option<&HashVal>,
    bravery: f64,
) -> HeightVote {
    let mut weight_for: HashMap<HashVal, f64> = HashMap::new();
    let mut total_weight = 0.0f64;
    let mut prob_numerator = 0.0f64;

    for opinion in registry.opinions.values() {
        let Some(p) = opinion.get_prob(h) else { continue };
        let hash = opinion.get_blockhash(h).unwrap_or(HashVal::ZERO);
        let weight = (opinion.deposit_size as f64).max(1.0);
        *weight_for.entry(hash).or_insert(0.0) += weight;
        total_weight += weight;
        prob_numerator += weight * p.as_f64();
    }

    if let Some(lb) = local_block {
        let weight = 1.0;
        *weight_for.entry(*lb).or_insert(0.0) += weight;
        total_weight += weight;
        prob_numerator += weight * 0.5;
    }

    if total_weight == 0.0 {
        return HeightVote {
            prob: Prob::HALF,
            preferred_hash: HashVal::ZERO,
            ask: false,
        };
    }

    let preferred_hash = weight_for
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(h, _)| h)
        .unwrap_or(HashVal::ZERO);

    let mean = prob_numerator / total_weight;
    // `bravery` sharpens the mean towards 0/1: a sharper strategy converges
    // to finalization faster once the crowd agrees, at the cost of being
    // more confident on less evidence.
    let sharpened = sharpen(mean, bravery);

    let ask = !preferred_hash.is_zero() && local_block != Some(&preferred_hash);

    HeightVote {
        prob: Prob::from_f64(sharpened),
        preferred_hash,
        ask,
    }
}

fn sharpen(p: f64, bravery: f64) -> f64 {
    let centered = p - 0.5;
    (0.5 + centered / bravery.max(1e-6)).clamp(0.0001, 0.9999)
}

/// Rate-limiting state carried across calls to `mkbet`. Kept in memory:
/// losing these on restart only costs a few redundant network
/// round-trips, never a correctness violation.
#[derive(Default)]
pub struct BetProducerState {
    pub last_bet_made: u64,
    pub last_asked_for_block: HashMap<HashVal, u64>,
    pub recently_discovered_blocks: Vec<u64>,
    pub prevhash: HashVal,
    pub seq: u64,
}

/// Runs one pass of the betting strategy over every unsettled height and,
/// if eligible, emits and broadcasts a signed bet. `now` is wall-clock
/// seconds.
#[allow(clippy::too_many_arguments)]
pub fn mkbet(
    store: &ChainStore,
    registry: &mut GuardianRegistry,
    state: &mut BetProducerState,
    config: &GuardianConfig,
    casper: &dyn CasperClient,
    transition: &dyn StateTransition,
    network: &dyn NetworkHandle,
    now: u64,
) -> Result<(), EngineError> {
    if now < state.last_bet_made + 2 {
        return Ok(());
    }
    state.last_bet_made = now;

    let max_finalized = store.max_finalized_height()?;
    let sign_from = max_finalized.max(0) as u64;
    let total = store.len()?;

    let mut srp = Vec::new();
    let mut srp_accum = FINALITY_HIGH;
    let mut calc_from = store.calc_state_roots_from()?;

    for h in sign_from..total {
        let existing_block = store.blocks.get(h as i64)?;
        let local_hash = existing_block.as_ref().map(|b| b.hash);
        let mut vote = bet_at_height(registry, h, local_hash.as_ref(), config.bravery);
        if config.crazy_bet {
            vote.prob = Prob::from_f64(fastrand::f64());
        }

        if vote.ask {
            let last_asked = state.last_asked_for_block.get(&vote.preferred_hash).copied().unwrap_or(0);
            if now > last_asked + 12 {
                network.broadcast(&Message::GetBlockByHash(vote.preferred_hash));
                state.last_asked_for_block.insert(vote.preferred_hash, now);
            }
        }

        let mut slot_block = existing_block.clone();
        if let Some(block) = &existing_block {
            if block.hash != vote.preferred_hash && !vote.preferred_hash.is_zero() {
                // Spec §4.4 step c: switch the slot to whichever block the
                // rest of the network prefers, if we already have it cached
                // from some earlier receipt (e.g. the losing side of a
                // double-block collision).
                if store.adopt_preferred_block(h, vote.preferred_hash)? {
                    slot_block = store.blocks.get(h as i64)?;
                }
                state.recently_discovered_blocks.push(h);
            }
        }

        let prior_prob = store.probs.get(h as i64)?.unwrap_or_default().as_f64();
        let flips_sign = (vote.prob.as_f64() - 0.5) * (prior_prob - 0.5) <= 0.0;
        let rediscovered = prior_prob >= 0.5 && state.recently_discovered_blocks.contains(&h);
        if (flips_sign || rediscovered) && h < calc_from {
            log::info!("rewinding calc_state_roots_from to {}", h);
            calc_from = h;
            store.set_calc_state_roots_from(calc_from)?;
        }

        store.probs.set(h as i64, Some(vote.prob))?;

        if srp_accum == FINALITY_HIGH && vote.prob.as_f64() >= FINALITY_HIGH {
            srp.push(FINALITY_HIGH);
        } else {
            srp_accum *= vote.prob.as_f64();
            srp.push(srp_accum.max(FINALITY_LOW));
        }

        if vote.prob.as_f64() > FINALITY_HIGH || vote.prob.as_f64() < FINALITY_LOW {
            let final_hash = if vote.prob.as_f64() > FINALITY_HIGH {
                slot_block.as_ref().map(|b| b.hash).unwrap_or(HashVal::ZERO)
            } else {
                HashVal::ZERO
            };
            store.finalized_hashes.set(h as i64, Some(final_hash))?;
            let mut mf = store.max_finalized_height()?;
            while h as i64 == mf + 1 {
                mf = h as i64;
                store.set_max_finalized_height(mf)?;
                if h % 10 == 0 {
                    let opt_root = store.stateroot_at(store.calc_state_roots_from()? as i64 - 1)?;
                    for (&i, opinion) in registry.opinions.iter_mut() {
                        opinion.deposit_size = casper.guardian_deposit(opt_root, i)?;
                    }
                }
            }
        }
    }

    crate::staterecomp::recalc_state_roots(
        store,
        transition,
        config.constants.max_recalc,
        config.constants.max_long_recalc,
    )?;

    emit_bet_if_eligible(store, registry, state, config, network, sign_from, &srp)
}

#[allow(clippy::too_many_arguments)]
fn emit_bet_if_eligible(
    store: &ChainStore,
    registry: &mut GuardianRegistry,
    state: &mut BetProducerState,
    config: &GuardianConfig,
    network: &dyn NetworkHandle,
    sign_from: u64,
    srp: &[f64],
) -> Result<(), EngineError> {
    let my_index = match registry.my_index {
        Some(i) => i,
        None => return Ok(()),
    };
    let total = store.len()?;
    let induction_height = store.induction_height;
    let withdrawn = registry
        .opinions
        .get(&my_index)
        .map(|o| o.withdrawn)
        .unwrap_or(false);
    if total <= induction_height || withdrawn || state.recently_discovered_blocks.is_empty() {
        return Ok(());
    }

    let calc_from = store.calc_state_roots_from()?;
    let rootstart = calc_from.max(induction_height);
    let blockstart = state
        .recently_discovered_blocks
        .iter()
        .copied()
        .min()
        .unwrap_or(sign_from)
        .max(induction_height);
    let probstart = sign_from.max(induction_height).min(blockstart).min(rootstart);
    let srprobstart = sign_from.max(induction_height).saturating_sub(sign_from);

    let mut probs = Vec::new();
    for h in probstart..total {
        probs.push(store.probs.get(h as i64)?.unwrap_or_default());
    }
    probs.reverse();

    let mut blockhashes = Vec::new();
    for h in blockstart..total {
        let hash = store.blocks.get(h as i64)?.map(|b| b.hash).unwrap_or(HashVal::ZERO);
        blockhashes.push(hash);
    }
    blockhashes.reverse();

    let mut stateroots = Vec::new();
    for h in rootstart..total {
        stateroots.push(store.stateroots.get(h as i64)?.unwrap_or(HashVal::ZERO));
    }
    stateroots.reverse();

    // `srp` is the cumulative state-root probability computed in `mkbet`'s
    // main loop, one entry per height starting at `sign_from`; slice it by
    // `srprobstart` rather than re-deriving it from the raw per-height
    // `probs` (spec §4.4: `stateroot_probs = reverse(srp[srprobstart..])`).
    let mut srp_slice: Vec<Prob> = srp
        .iter()
        .copied()
        .enumerate()
        .skip(srprobstart as usize)
        .map(|(idx, acc)| {
            let h = sign_from + idx as u64;
            let root = store.stateroots.get(h as i64)?.unwrap_or(HashVal::ZERO);
            let val = if root.is_zero() { FINALITY_LOW } else { acc };
            Ok(Prob::from_f64(val))
        })
        .collect::<Result<Vec<Prob>, EngineError>>()?;
    srp_slice.reverse();

    let bet = crate::bet::Bet::sign(
        my_index,
        crate::bet::BetHeight::Height(total - 1),
        probs,
        blockhashes,
        stateroots,
        srp_slice,
        state.prevhash,
        state.seq,
        config.signer.as_ref(),
    );
    state.recently_discovered_blocks.clear();
    state.prevhash = bet.hash();
    state.seq += 1;

    network.broadcast(&Message::Bet(bet.clone()));
    registry.receive_bet(bet.clone())?;

    // Test-only byzantine mode: re-sign a perturbed copy of the same bet
    // at the same seq/prevhash, which is by construction a double bet, to
    // exercise self-slashing.
    if config.double_bet_suicide != u64::MAX && bet.seq > config.double_bet_suicide && !bet.probs.is_empty() {
        log::warn!("byzantine test mode: double-betting at seq {}", bet.seq);
        let mut perturbed_probs = bet.probs.clone();
        perturbed_probs[0] = Prob::from_f64(perturbed_probs[0].as_f64() * 0.9);
        let byzantine_bet = crate::bet::Bet::sign(
            bet.index,
            bet.height,
            perturbed_probs,
            bet.blockhashes.clone(),
            bet.stateroots.clone(),
            bet.stateroot_probs.clone(),
            bet.prevhash,
            bet.seq,
            config.signer.as_ref(),
        );
        network.broadcast(&Message::Bet(byzantine_bet.clone()));
        registry.receive_bet(byzantine_bet)?;
    }
    Ok(())
}
