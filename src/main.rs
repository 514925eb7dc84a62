//! Demo driver for `bspseq`: builds a distributed sequence of integers,
//! runs it through `map`/`filter`/`scan`/`reduce`, and prints the
//! result from rank 0. Launch with `mpirun -n <P> target/debug/bspseq`;
//! a plain, unlaunched run behaves as a single rank.

use bspseq::{Context, MpiComm};

fn main() -> bspseq::Result<()> {
    bspseq::init_tracing();

    let comm = MpiComm::new()?;
    let ctx = Context::new(comm);
    let rank = ctx.rank();
    let procs = ctx.procs();

    tracing::info!(rank, procs, "starting demo run");

    let squares = ctx
        .iterates(1_000, false)
        .map(|x: &usize| (x * x) as i64)
        .filter(|x: &i64| x % 2 == 0)
        .scan(|a, b| a + b)
        .into_local();

    let total = ctx
        .from_local(squares.clone())
        .reduce(0i64, |acc, v| *acc += v, false);

    if rank == 0 {
        println!("rank {rank}/{procs}: local scan tail = {:?}", squares.last());
        println!("rank {rank}/{procs}: sum of all local scan values = {total}");
    }

    Ok(())
}
