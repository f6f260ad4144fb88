use std::hint::black_box;

use criterion::*;
use world_engine::prelude::*;

mod common;
use common::*;

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    group.bench_function("tick_2_systems_10k", |b| {
        b.iter_batched(
            || {
                let mut world = make_world().unwrap();
                populate(&mut world, AGENTS_MED).unwrap();

                // System 1: wealth += productivity
                world
                    .register_system("production", |ctx| {
                        let ids = ctx
                            .search(ComponentFilter::contains([Productivity::NAME, Wealth::NAME]))
                            .collect()?;
                        for id in ids {
                            let rate = ctx.get_component::<Productivity>(id)?.rate;
                            ctx.update_component::<Wealth, _>(id, |w| w.value += rate)?;
                        }
                        Ok(())
                    })
                    .unwrap();

                // System 2: wealth decay
                world
                    .register_system("decay", |ctx| {
                        for id in ctx.search(ComponentFilter::contains([Wealth::NAME])).collect()? {
                            ctx.update_component::<Wealth, _>(id, |w| w.value *= 0.9999)?;
                        }
                        Ok(())
                    })
                    .unwrap();

                world.init().unwrap();
                world.tick().unwrap();
                world
            },
            |world| {
                world.tick().unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);
