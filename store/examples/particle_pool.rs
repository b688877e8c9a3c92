//! A small demonstration of the component store used as a particle pool.
//!
//! Run with: cargo run --example particle_pool

use quasar_macros::Component;
use quasar_store::storage::manager::Manager;

#[derive(Component, Debug)]
struct Particle {
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
    ttl: u32,
}

fn main() {
    let mut manager = Manager::new();

    // Spawn a burst of particles.
    let handles: Vec<_> = (0..1_000)
        .map(|i| {
            manager.alloc(Particle {
                x: 0.0,
                y: 0.0,
                dx: (i % 17) as f32 * 0.1,
                dy: (i % 13) as f32 * 0.1,
                ttl: 30 + (i % 60) as u32,
            })
        })
        .collect();

    println!("spawned {} particles", manager.len::<Particle>());

    // Simulate a few frames: integrate, age, and free expired particles.
    for frame in 0..60 {
        for (_, particle) in manager.iter_mut::<Particle>().unwrap() {
            particle.x += particle.dx;
            particle.y += particle.dy;
            particle.ttl = particle.ttl.saturating_sub(1);
        }

        let expired: Vec<_> = manager
            .iter::<Particle>()
            .unwrap()
            .filter(|(_, p)| p.ttl == 0)
            .map(|(handle, _)| handle)
            .collect();
        for handle in expired {
            manager.free(handle);
        }

        if frame % 15 == 0 {
            println!("frame {:2}: {} particles alive", frame, manager.len::<Particle>());
        }
    }

    // Handles that survived can still be read; expired ones read as None.
    let alive = handles
        .iter()
        .filter(|&&h| manager.get::<Particle>(h).is_some())
        .count();
    println!("{} of the original handles are still live", alive);
}
