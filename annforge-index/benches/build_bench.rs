// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use annforge_core::{Metric, TuningParams};
use annforge_index::{apply_parameters, index_factory, to_bytes, IdMappedIndex, IndexArtifact, StoredIndex};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn generate_vectors(n: usize, dim: usize) -> Vec<f32> {
    (0..n * dim)
        .map(|i| ((i * 7 + (i / dim) * 13) % 100) as f32 / 100.0)
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let dim = 64;
    let mut group = c.benchmark_group("build");

    for description in ["Flat", "HNSW16,Flat"] {
        for size in [1000usize, 5000].iter() {
            let data = generate_vectors(*size, dim);
            let ids: Vec<i64> = (0..*size as i64).collect();
            group.throughput(Throughput::Elements(*size as u64));
            group.bench_with_input(BenchmarkId::new(description, size), size, |b, _| {
                b.iter(|| {
                    let index = index_factory(dim, description, Metric::L2).unwrap();
                    let mut mapped = IdMappedIndex::wrap(index).unwrap();
                    mapped.add_with_ids(black_box(&data), &ids).unwrap();
                    mapped
                });
            });
        }
    }

    group.finish();
}

fn bench_ivf_train_and_add(c: &mut Criterion) {
    let dim = 32;
    let size = 10_000;
    let data = generate_vectors(size, dim);
    let ids: Vec<i64> = (0..size as i64).collect();

    c.bench_function("ivf64_train_add", |b| {
        b.iter(|| {
            let mut index = index_factory(dim, "IVF64,Flat", Metric::L2).unwrap();
            index.train(&data).unwrap();
            apply_parameters(&TuningParams::new().with("nprobe", 8), &mut index).unwrap();
            let mut mapped = IdMappedIndex::wrap(index).unwrap();
            mapped.add_with_ids(black_box(&data), &ids).unwrap();
            mapped
        });
    });
}

fn bench_search(c: &mut Criterion) {
    let dim = 64;
    let data = generate_vectors(10_000, dim);
    let mut index = index_factory(dim, "HNSW16,Flat", Metric::L2).unwrap();
    index.add(&data).unwrap();
    let query = &data[..dim];

    c.bench_function("hnsw_search_k10", |b| {
        b.iter(|| index.search(black_box(query), 10, None).unwrap());
    });
}

fn bench_serialize(c: &mut Criterion) {
    let dim = 64;
    let data = generate_vectors(5000, dim);
    let mut index = index_factory(dim, "Flat", Metric::L2).unwrap();
    index.add(&data).unwrap();
    let artifact = IndexArtifact::Float(StoredIndex::Bare(index));

    c.bench_function("artifact_to_bytes", |b| {
        b.iter(|| black_box(to_bytes(&artifact).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_build,
    bench_ivf_train_and_add,
    bench_search,
    bench_serialize
);
criterion_main!(benches);
