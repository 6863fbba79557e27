//! Drives the sans-io roles with a random message scheduler that drops,
//! duplicates and reorders everything, then checks that at most one value
//! is ever chosen.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use synod_paxos::{
    AcceptRequest, AcceptResponse, AcceptorId, AcceptorTrait, BasicAcceptor, PrepareRequest,
    PrepareResponse, ProposerCore,
};

const ACCEPTORS: usize = 3;
const PROPOSERS: usize = 3;
const STEPS: usize = 3_000;

#[derive(Clone)]
enum Message {
    Prepare(usize, AcceptorId, PrepareRequest),
    Promise(usize, AcceptorId, PrepareResponse<String>),
    Accept(usize, AcceptorId, AcceptRequest<String>),
    Accepted(usize, AcceptorId, AcceptResponse),
}

fn run(seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut acceptors: Vec<BasicAcceptor<String>> =
        (0..ACCEPTORS).map(|_| BasicAcceptor::new()).collect();
    let mut proposers: Vec<ProposerCore<String>> = (0..PROPOSERS)
        .map(|p| ProposerCore::new(format!("P{}", p), 0..ACCEPTORS).unwrap())
        .collect();
    let mut pool: Vec<Message> = Vec::new();
    let mut chosen = Vec::new();

    for _ in 0..STEPS {
        // Occasionally a proposer starts or times out and retries.
        if rng.random_bool(0.05) {
            let p = rng.random_range(0..PROPOSERS);
            let value = format!("v{}", p);
            let proposer = &mut proposers[p];
            let prepare = match proposer.current_id().cloned() {
                Some(id) => proposer.restart(&id, value),
                None => proposer.begin(value).ok(),
            };
            if let Some(req) = prepare {
                for a in 0..ACCEPTORS {
                    pool.push(Message::Prepare(p, a, req.clone()));
                }
            }
        }

        if pool.is_empty() {
            continue;
        }
        let i = rng.random_range(0..pool.len());
        let msg = if rng.random_bool(0.1) {
            pool[i].clone()
        } else {
            pool.swap_remove(i)
        };
        if rng.random_bool(0.1) {
            continue;
        }

        match msg {
            Message::Prepare(p, a, req) => {
                let resp = acceptors[a].handle_prepare(&req);
                pool.push(Message::Promise(p, a, resp));
            }
            Message::Promise(p, a, resp) => {
                if let Some(req) = proposers[p].on_prepare_response(a, resp) {
                    for a in 0..ACCEPTORS {
                        pool.push(Message::Accept(p, a, req.clone()));
                    }
                }
            }
            Message::Accept(p, a, req) => {
                let resp = acceptors[a].handle_accept(&req);
                pool.push(Message::Accepted(p, a, resp));
            }
            Message::Accepted(p, a, resp) => {
                if let Some(decision) = proposers[p].on_accept_response(a, resp) {
                    chosen.push(decision.value);
                }
            }
        }
    }
    chosen
}

#[test]
fn random_schedules_never_choose_two_values() {
    let mut decided_runs = 0;
    for seed in 0..200 {
        let chosen = run(seed);
        if let Some(first) = chosen.first() {
            decided_runs += 1;
            assert!(
                chosen.iter().all(|v| v == first),
                "seed {}: conflicting decisions {:?}",
                seed,
                chosen
            );
        }
    }
    assert!(decided_runs > 0, "No schedule reached a decision");
}
