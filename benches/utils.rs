use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

pub const PROFILE: &str = include_str!("template_profile.hbs");
pub const SIGNATURE: &str = include_str!("template_signature.hbs");

/// Generate n random profile contexts to render in the benchmark
pub fn generate_random_contexts(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility

    (0..n)
        .map(|_| {
            let items_count = rng.random_range(3..10);
            let items: Vec<Value> = (0..items_count)
                .map(|_| {
                    json!({
                        "name": random_string(&mut rng, 3, 8),
                        "value": rng.random_range(10..1000),
                        "special": rng.random_bool(0.3)
                    })
                })
                .collect();

            json!({
                "user": {
                    // Markup in names exercises the escaping path.
                    "name": format!("<{}>", random_string(&mut rng, 5, 10)),
                    "age": rng.random_range(18..80),
                    "active": rng.random_bool(0.7)
                },
                "items": items,
                "show_details": rng.random_bool(0.8),
                "has_access": rng.random_bool(0.6),
            })
        })
        .collect()
}

/// Generate a random lowercase string with length between min and max
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let len = rng.random_range(min_len..=max_len);
    (0..len)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect()
}

// Print binary size information - can be used from individual benchmarks
pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let size_bytes = std::fs::metadata(&binary_path).unwrap().len();
    let size_kb = size_bytes as f64 / 1024.0;

    println!(
        "Binary size: {:.2} MB ({:.2} KB, {} bytes)",
        size_kb / 1024.0,
        size_kb,
        size_bytes
    );
    println!("Binary path: {}", binary_path.display());
}
