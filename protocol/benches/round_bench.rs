// Round hot-path benchmarks for TrustMesh.
//
// Covers proposal creation and verification, SigBundle encoding and
// decoding at several network sizes, and the reputation-weighted tally.

use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use trustmesh_protocol::consensus::gossip::build_bundle;
use trustmesh_protocol::consensus::{weighted_score, Attestation, ProposalBody, ProposalHash};
use trustmesh_protocol::crypto::{NodeId, NodeKeypair};
use trustmesh_protocol::directory::ReputationSnapshot;
use trustmesh_protocol::wire::{MessageType, WireMessage};

const ROUND: u64 = 1_000;

/// `n` attestations on `hash`, and a snapshot weighting every signer.
fn setup_attestations(
    n: usize,
    hash: &ProposalHash,
) -> (HashMap<NodeId, Attestation>, ReputationSnapshot) {
    let mut attestations = HashMap::with_capacity(n);
    let mut weights = Vec::with_capacity(n);
    for i in 0..n {
        let keypair = NodeKeypair::generate();
        let score = (i as u32 * 37) % 10_000;
        attestations.insert(
            keypair.node_id(),
            Attestation::sign(&keypair, ROUND, hash, score, 1_700_000_000_000),
        );
        weights.push((keypair.node_id(), 1_000 + i as u64));
    }
    (attestations, ReputationSnapshot::from_weights(weights))
}

fn bench_proposal(c: &mut Criterion) {
    let keypair = NodeKeypair::generate();
    let payload = b"alpha-bravo-charlie-delta-echo".to_vec();

    c.bench_function("proposal_create", |b| {
        b.iter(|| ProposalBody::create(&keypair, ROUND, payload.clone(), 1_700_000_000_000));
    });

    let (_, body) = ProposalBody::create(&keypair, ROUND, payload, 1_700_000_000_000);
    c.bench_function("proposal_verify", |b| {
        b.iter(|| body.verify(ROUND).unwrap());
    });
}

fn bench_bundle_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("sig_bundle");
    let hash = ProposalHash([0xABu8; 32]);

    for n in [4usize, 32, 128] {
        let (attestations, _) = setup_attestations(n, &hash);
        let message =
            WireMessage::SigBundle(build_bundle(ROUND, hash, attestations, HashMap::new()));
        let frame = message.encode().unwrap();
        let body = frame[8..].to_vec();
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", n), &message, |b, message| {
            b.iter(|| message.encode().unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", n), &body, |b, body| {
            b.iter(|| WireMessage::decode(MessageType::ProposalSig, body).unwrap());
        });
    }
    group.finish();
}

fn bench_weighted_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_score");
    let hash = ProposalHash([0x11u8; 32]);

    for n in [4usize, 32, 128] {
        let (attestations, snapshot) = setup_attestations(n, &hash);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(n),
            &(attestations, snapshot),
            |b, (attestations, snapshot)| {
                b.iter(|| weighted_score(attestations, snapshot).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_proposal, bench_bundle_codec, bench_weighted_score);
criterion_main!(benches);
