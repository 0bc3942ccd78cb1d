//! Fuzz driver for a matrix-multiply shape checker.
//!
//! Build the target (and this driver) with coverage instrumentation so
//! the guard hooks fire:
//!
//! ```text
//! RUSTFLAGS="-Cpasses=sancov-module \
//!            -Cllvm-args=-sanitizer-coverage-level=3 \
//!            -Cllvm-args=-sanitizer-coverage-trace-pc-guard" \
//!     cargo run --release --example check_matmul -- --corpus corpus_matmul
//! ```

use waypoint_engine::{driver, traced, FuzzConfig, STATUS_EXPECTED_EXCEPTION};

#[derive(Debug)]
enum Layout {
    RowMajor,
    ColMajor,
}

#[derive(Debug)]
struct ShapeError;

/// The function under test: validates operand shapes for `A(m,k) x B(k,n)`.
fn check_matmul(
    layout: &Layout,
    a_rows: i64,
    a_cols: i64,
    b_rows: i64,
    b_cols: i64,
) -> Result<(i64, i64), ShapeError> {
    if a_rows < 1 || a_cols < 1 || b_rows < 1 || b_cols < 1 {
        return Err(ShapeError);
    }
    let inner = match layout {
        Layout::RowMajor => b_rows,
        Layout::ColMajor => b_cols,
    };
    if a_cols != inner {
        return Err(ShapeError);
    }
    match layout {
        Layout::RowMajor => Ok((a_rows, b_cols)),
        Layout::ColMajor => Ok((a_rows, b_rows)),
    }
}

fn main() -> anyhow::Result<()> {
    let mut config = FuzzConfig::new();
    config.enum_arg("layout", &["row_major", "col_major"])?;
    let a_rows = config.int_arg("a_rows")?;
    let a_cols = config.int_arg("a_cols")?;
    let b_rows = config.int_arg("b_rows")?;
    let b_cols = config.int_arg("b_cols")?;
    config.add_hard_constraints([
        a_rows.ge(1),
        a_cols.clone().ge(1),
        b_rows.clone().ge(1),
        b_cols.clone().ge(1),
    ]);
    // Shapes that multiply are the interesting half of the space.
    config.add_soft_constraint(a_cols.eq_expr(b_rows));

    let code = driver(config, |input| {
        let layout = match input.get("layout").unwrap() {
            0 => Layout::RowMajor,
            _ => Layout::ColMajor,
        };
        let result = traced(|| {
            check_matmul(
                &layout,
                input.get("a_rows").unwrap(),
                input.get("a_cols").unwrap(),
                input.get("b_rows").unwrap(),
                input.get("b_cols").unwrap(),
            )
        });
        match result {
            Ok(_) => 0,
            Err(ShapeError) => STATUS_EXPECTED_EXCEPTION,
        }
    })?;
    std::process::exit(code);
}
