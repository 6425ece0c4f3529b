//! Provision a user account.
//!
//! ```text
//! create_user --email admin@example.com --role admin
//! ```
//!
//! Reads the database settings the server uses. When `--password` is
//! omitted a random password is generated and printed once.

use clap::{Arg, ArgMatches, Command};
use sqlx::postgres::PgPoolOptions;
use todo_auth::auth::{generate_password, hash_password};
use todo_auth::configuration::get_configuration;
use todo_auth::error::AppError;
use todo_auth::models::{NewUser, Role};
use todo_auth::repository::UserRepository;
use todo_auth::session::{scoped_transaction, PgSessionFactory};
use todo_auth::telemetry::init_telemetry;
use todo_auth::validation::validate_new_user;

const GENERATED_PASSWORD_LENGTH: usize = 16;

fn command() -> Command {
    Command::new("create_user")
        .about("Create a user account")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("email")
                .long("email")
                .help("Login email of the new user")
                .required(true),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .help("Initial password; generated when omitted")
                .env("CREATE_USER_PASSWORD"),
        )
        .arg(Arg::new("name").long("name").help("Display name"))
        .arg(
            Arg::new("role")
                .long("role")
                .help("Account role")
                .default_value("user")
                .value_parser(["admin", "user"]),
        )
}

async fn create(matches: &ArgMatches) -> Result<(), AppError> {
    let email = matches
        .get_one::<String>("email")
        .cloned()
        .unwrap_or_default();
    let role = matches
        .get_one::<String>("role")
        .map(String::as_str)
        .unwrap_or("user")
        .parse::<Role>()
        .map_err(AppError::Internal)?;

    let (password, generated) = match matches.get_one::<String>("password") {
        Some(password) => (password.clone(), false),
        None => (generate_password(GENERATED_PASSWORD_LENGTH), true),
    };

    let input = validate_new_user(
        &email,
        &password,
        matches.get_one::<String>("name").map(String::as_str),
    )?;

    let settings = get_configuration()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&settings.database.connection_string())
        .await?;
    let factory = PgSessionFactory::new(pool);

    let new_user = NewUser {
        email: input.email,
        password_hash: hash_password(&input.password)?,
        role,
        name: input.name,
    };

    let user = scoped_transaction(&factory, |session| {
        Box::pin(async move { session.insert_user(new_user).await })
    })
    .await?;

    tracing::info!(user_id = user.id, role = %user.role, "User created");
    println!("Created {} user {} (id {})", user.role, user.email, user.id);
    if generated {
        println!("Generated password: {}", password);
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_telemetry();

    let matches = command().get_matches();
    if let Err(e) = create(&matches).await {
        eprintln!("Failed to create user: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn test_role_defaults_to_user() {
        let matches = command()
            .try_get_matches_from(["create_user", "--email", "a@example.com"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("role").map(String::as_str), Some("user"));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result =
            command().try_get_matches_from(["create_user", "--email", "a@example.com", "--role", "root"]);
        assert!(result.is_err());
    }
}
