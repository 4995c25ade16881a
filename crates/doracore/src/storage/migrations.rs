//! Embedded schema migrations, run once at startup via `refinery`.

refinery::embed_migrations!("migrations");

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    #[test]
    fn migrations_apply_cleanly_to_a_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        super::migrations::runner().run(&mut conn).unwrap();

        let cols: Vec<String> = conn
            .prepare("PRAGMA table_info(file_cache)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(cols.contains(&"id".to_string()));
        assert!(cols.contains(&"url".to_string()));
    }
}
