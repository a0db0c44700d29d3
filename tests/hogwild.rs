//! Several threads training one shared model, each with its own `State`.

use std::thread;

use fasttext_core::*;

const LABELS: usize = 6;
const THREADS: usize = 4;
const EPOCHS: usize = 30;

/// Label `l` owns features `4l..4l+4`; features `4 * LABELS..` are noise.
fn dataset() -> Vec<(Vec<usize>, usize)> {
    let noise = 4 * LABELS;
    let mut examples = vec![];
    for round in 0..10 {
        for l in 0..LABELS {
            let a = 4 * l + round % 4;
            let b = 4 * l + (round + 1) % 4;
            examples.push((vec![a, b, noise + (round + l) % 5], l));
        }
    }
    examples
}

/// Train for `EPOCHS`, returning the mean loss of each epoch.
fn train(model: &Model, examples: &[(Vec<usize>, usize)]) -> Vec<f32> {
    let mut epoch_losses = vec![];
    for epoch in 0..EPOCHS {
        let losses: Vec<(f32, u64)> = thread::scope(|s| {
            let handles = (0..THREADS)
                .map(|id| {
                    s.spawn(move || {
                        let mut state = model.new_state((epoch * THREADS + id) as u64);
                        for (input, label) in examples.iter().skip(id).step_by(THREADS) {
                            model.update(input, &[*label], 0, 0.25, &mut state).unwrap();
                        }
                        (state.loss().unwrap_or(0.0), state.nexamples())
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let n: u64 = losses.iter().map(|&(_, n)| n).sum();
        let total: f32 = losses.iter().map(|&(loss, n)| loss * n as f32).sum();
        epoch_losses.push(total / n as f32);
    }
    epoch_losses
}

fn mean(xs: &[f32]) -> f32 {
    xs.iter().sum::<f32>() / xs.len() as f32
}

fn check_training(args: ModelArgs) {
    let examples = dataset();
    let model = Model::from_args(&args, 4 * LABELS + 5, &[10; LABELS]).unwrap();
    let losses = train(&model, &examples);

    for m in [model.input_matrix(), model.output_matrix()] {
        assert!(m.to_vec().iter().all(|x| x.is_finite()));
    }
    let early = mean(&losses[..5]);
    let late = mean(&losses[EPOCHS - 5..]);
    assert!(late < early, "loss went from {early} to {late}: {losses:?}");

    let mut state = model.new_state(0);
    let mut heap = Predictions::new();
    let mut correct = 0;
    for (input, label) in &examples {
        model.predict(input, 1, 0.0, &mut heap, &mut state).unwrap();
        if heap.best().map(|p| p.label) == Some(*label) {
            correct += 1;
        }
    }
    assert!(correct * 10 >= examples.len() * 8, "{correct}/{} correct", examples.len());
}

#[test]
fn lock_free_training_converges() {
    check_training(ModelArgs {
        dim: 10,
        loss: LossKind::Softmax,
        seed: 3,
        ..ModelArgs::default()
    });
}

#[test]
fn lock_free_negative_sampling_converges() {
    check_training(ModelArgs {
        dim: 10,
        loss: LossKind::NegativeSampling,
        neg: 3,
        seed: 3,
        ..ModelArgs::default()
    });
}

#[test]
fn row_locked_training_converges() {
    check_training(ModelArgs {
        dim: 10,
        loss: LossKind::OneVsAll,
        seed: 3,
        row_lock_shards: Some(8),
        ..ModelArgs::default()
    });
}

#[test]
fn predict_runs_alongside_update() {
    let examples = dataset();
    let args = ModelArgs {
        dim: 8,
        loss: LossKind::HierarchicalSoftmax,
        seed: 1,
        ..ModelArgs::default()
    };
    let model = Model::from_args(&args, 4 * LABELS + 5, &[10; LABELS]).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            let mut state = model.new_state(1);
            for _ in 0..20 {
                for (input, label) in &examples {
                    model.update(input, &[*label], 0, 0.1, &mut state).unwrap();
                }
            }
        });
        s.spawn(|| {
            let mut state = model.new_state(2);
            let mut heap = Predictions::with_capacity(3);
            for _ in 0..20 {
                for (input, _) in &examples {
                    model.predict(input, 3, 0.0, &mut heap, &mut state).unwrap();
                    assert!(heap.len() <= 3);
                    assert!(heap.iter().all(|p| p.score.is_finite()));
                }
            }
        });
    });
}
