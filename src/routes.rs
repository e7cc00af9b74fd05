use anyhow::Result;

use crate::config::Config;

/// Print which targets each known record type is written to.
pub fn list_routes(config: &Config) -> Result<()> {
    let table = config.route_table()?;

    let mut types: Vec<&str> = table.hierarchy().known_types().into_iter().collect();
    for index in table.indexes() {
        types.extend(index.models.iter().map(|m| m.name.as_str()));
    }
    types.sort_unstable();
    types.dedup();

    println!("{:<24} {:<24} {:<20} CULTURE", "TYPE", "INDEXED AS", "INDEX");
    for ty in types {
        match table.resolve(ty) {
            Ok(routes) if !routes.is_empty() => {
                for route in routes {
                    println!(
                        "{:<24} {:<24} {:<20} {}",
                        ty, route.model, route.target.index, route.target.culture
                    );
                }
            }
            // Known to the hierarchy but not indexed anywhere.
            _ => println!("{:<24} {:<24} {:<20} -", ty, "-", "-"),
        }
    }

    Ok(())
}
