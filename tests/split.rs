use eltwise_kernels::error::OpError;
use eltwise_kernels::selected_rows::{split_selected_rows, split_selected_rows_grad, SelectedRows};
use eltwise_kernels::tensors::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn rows(rows: Vec<i64>, height: i64, width: usize) -> SelectedRows<f32> {
    let data = rows
        .iter()
        .flat_map(|&r| (0..width).map(move |c| (r * 10) as f32 + c as f32))
        .collect();
    let n = rows.len();
    SelectedRows::new(rows, height, Tensor::new(vec![n, width], data)).unwrap()
}

#[test]
fn rows_are_rebased_to_their_section() {
    let x = rows(vec![7, 5], 12, 2);
    let out = split_selected_rows(&x, &[4, 8], 2).unwrap();

    assert!(out[0].rows.is_empty());
    assert_eq!(out[0].height, 4);
    assert_eq!(out[0].value.shape, vec![0, 2]);

    assert_eq!(out[1].rows, vec![3, 1]);
    assert_eq!(out[1].height, 8);
    assert_eq!(out[1].value.data, vec![70.0, 71.0, 50.0, 51.0]);
}

#[test]
fn rows_keep_input_order_within_a_shard() {
    let x = rows(vec![9, 0, 3, 2, 6], 10, 1);
    let out = split_selected_rows(&x, &[3, 3, 4], 3).unwrap();
    assert_eq!(out[0].rows, vec![0, 2]);
    assert_eq!(out[1].rows, vec![0]);
    assert_eq!(out[2].rows, vec![3, 0]);
    assert_eq!(out[2].value.data, vec![90.0, 60.0]);
}

#[test]
fn section_count_must_match_outputs() {
    let x = rows(vec![1], 12, 1);
    assert_eq!(
        split_selected_rows(&x, &[4, 8], 3).unwrap_err(),
        OpError::Arity {
            sections: 2,
            outputs: 3
        }
    );
}

#[test]
fn rows_outside_every_section_are_rejected() {
    let x = rows(vec![2, 12], 12, 1);
    assert_eq!(
        split_selected_rows(&x, &[4, 8], 2).unwrap_err(),
        OpError::RowOutOfRange { row: 12, height: 12 }
    );

    let x = rows(vec![-1], 12, 1);
    assert!(matches!(
        split_selected_rows(&x, &[4, 8], 2),
        Err(OpError::RowOutOfRange { row: -1, .. })
    ));
}

#[test]
fn empty_sections_replicate_the_input() {
    let x = rows(vec![3, 1], 5, 2);
    let out = split_selected_rows(&x, &[], 3).unwrap();
    assert_eq!(out, vec![x.clone(), x.clone(), x]);
}

#[test]
fn zero_outputs_is_an_error() {
    let x = rows(vec![3], 5, 1);
    assert!(matches!(
        split_selected_rows(&x, &[], 0),
        Err(OpError::MissingOperand { .. })
    ));
}

#[test]
fn gradient_undoes_the_split() {
    let mut rng = StdRng::seed_from_u64(1);
    let sections = [3i64, 0, 5, 4];
    let total: i64 = sections.iter().sum();

    let mut all: Vec<i64> = (0..total).collect();
    all.shuffle(&mut rng);
    all.truncate(7);
    let x = rows(all, total, 3);

    let shards = split_selected_rows(&x, &sections, sections.len()).unwrap();
    let refs: Vec<_> = shards.iter().collect();
    let merged = split_selected_rows_grad(&refs, &sections).unwrap();

    assert_eq!(merged.height, total);
    let mut got: Vec<(i64, Vec<f32>)> = merged
        .rows
        .iter()
        .enumerate()
        .map(|(k, &r)| (r, merged.value.data[k * 3..(k + 1) * 3].to_vec()))
        .collect();
    let mut want: Vec<(i64, Vec<f32>)> = x
        .rows
        .iter()
        .enumerate()
        .map(|(k, &r)| (r, x.value.data[k * 3..(k + 1) * 3].to_vec()))
        .collect();
    got.sort_by_key(|(r, _)| *r);
    want.sort_by_key(|(r, _)| *r);
    assert_eq!(got, want);
}

#[test]
fn gradient_rejects_mismatched_widths() {
    let a = rows(vec![0], 2, 2);
    let b = rows(vec![1], 2, 3);
    assert!(matches!(
        split_selected_rows_grad(&[&a, &b], &[1, 1]),
        Err(OpError::LengthMismatch { .. })
    ));
}

#[test]
fn hand_built_row_sets_are_checked_before_slicing() {
    let x = SelectedRows {
        rows: vec![0, 1],
        height: 4,
        value: Tensor::new(vec![1, 1], vec![1.0f32]),
    };
    assert_eq!(
        split_selected_rows(&x, &[2, 2], 2).unwrap_err(),
        OpError::LengthMismatch {
            what: "selected rows",
            expected: 2,
            got: 1
        }
    );

    let ok = rows(vec![0], 2, 1);
    let mut short = rows(vec![1], 2, 1);
    short.value.data.clear();
    assert!(matches!(
        split_selected_rows_grad(&[&ok, &short], &[1, 1]),
        Err(OpError::LengthMismatch { .. })
    ));
}
