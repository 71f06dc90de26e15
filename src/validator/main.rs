//! Standalone validator for filter profile files.
//!
//! This tool validates the JSON profile file of the project monitor,
//! checking budget bounds, skill lists and duplicate users.

use std::process::ExitCode;

use clap::Parser;

use project_monitor::config::ProfileBook;

/// Filter profile validator.
#[derive(Parser, Debug)]
#[command(name = "validate_profiles")]
#[command(about = "Validates filter profile files for the project monitor")]
#[command(version)]
struct Args {
    /// Path to the JSON profile file to validate.
    #[arg(short, long, default_value = "profiles.json")]
    file: String,

    /// Generate an example profile file at the specified path.
    #[arg(long)]
    generate_example: Option<String>,

    /// Show every profile, not only the invalid ones.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    validate_profiles(&args.file, args.verbose)
}

fn generate_example(output_path: &str) -> ExitCode {
    let example = ProfileBook::example();

    match example.save_to_file(output_path) {
        Ok(()) => {
            println!("✓ Example profiles written to: {output_path}");
            println!("\nThe file contains {} example profiles.", example.len());
            println!("Replace the user ids with the Telegram chat ids of your subscribers.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_profiles(path: &str, verbose: bool) -> ExitCode {
    println!("Validating: {path}\n");

    let book = match ProfileBook::load_from_file(path) {
        Ok(book) => book,
        Err(e) => {
            eprintln!("✗ Failed to load profiles: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut errors = 0;
    let mut inactive = 0;

    for (profile, result) in book.profiles.iter().zip(book.validate_all()) {
        if !profile.active {
            inactive += 1;
        }

        if verbose {
            println!(
                "[{}]{} {}",
                profile.user_id,
                if profile.active { "" } else { " (inactive)" },
                profile.describe()
            );
        }

        match result {
            Ok(()) => {
                if verbose {
                    println!("  ✓ OK");
                }
            }
            Err(e) => {
                errors += 1;
                if !verbose {
                    println!("[{}]", profile.user_id);
                }
                println!("  ✗ Error: {e}");
            }
        }
    }

    println!();

    let total = book.len();
    if errors == 0 {
        println!("✓ All {total} profiles are valid!");
        if inactive > 0 {
            println!("  ({inactive} inactive profile(s) will not receive notifications)");
        }
        ExitCode::SUCCESS
    } else {
        println!("✗ Validation failed: {errors} error(s) in {total} profiles");
        println!("  Valid: {}/{total}", total - errors);
        ExitCode::FAILURE
    }
}
