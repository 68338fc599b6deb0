//! Run with `DATABASE_URL=sqlite://demo.db?mode=rwc cargo run -- --migrations-dir migrations up`.

fn main() {
    sqlx_changelog::cli::run::<sqlx::Sqlite>();
}
