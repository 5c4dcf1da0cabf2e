pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS models (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        url TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL
    );

    -- Subcategory names are unique across the whole table, not per category.
    CREATE TABLE IF NOT EXISTS subcategories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category_id INTEGER NOT NULL,
        name TEXT UNIQUE NOT NULL,
        FOREIGN KEY(category_id) REFERENCES categories(id)
    );

    CREATE TABLE IF NOT EXISTS models_categories (
        model_id INTEGER NOT NULL,
        category_id INTEGER NOT NULL,
        FOREIGN KEY(model_id) REFERENCES models(id),
        FOREIGN KEY(category_id) REFERENCES categories(id),
        PRIMARY KEY(model_id, category_id)
    );

    CREATE TABLE IF NOT EXISTS models_subcategories (
        model_id INTEGER NOT NULL,
        subcategory_id INTEGER NOT NULL,
        FOREIGN KEY(model_id) REFERENCES models(id),
        FOREIGN KEY(subcategory_id) REFERENCES subcategories(id),
        PRIMARY KEY(model_id, subcategory_id)
    );

    CREATE INDEX IF NOT EXISTS idx_models_categories_category
        ON models_categories(category_id);
    CREATE INDEX IF NOT EXISTS idx_models_subcategories_subcategory
        ON models_subcategories(subcategory_id);
";
