const CREATE_USER_TABLE: &str = "CREATE TABLE IF NOT EXISTS app_user (
  id INTEGER PRIMARY KEY,
  username TEXT,
  first_name TEXT,
  last_name TEXT,
  names_from_intro INTEGER NOT NULL DEFAULT 0
)";

const CREATE_GROUP_TABLE: &str = "CREATE TABLE IF NOT EXISTS chat_group (
  id INTEGER PRIMARY KEY,
  title TEXT NOT NULL
)";

const CREATE_GROUP_MEMBER_TABLE: &str = "CREATE TABLE IF NOT EXISTS group_member (
  group_id INTEGER NOT NULL,
  user_id INTEGER NOT NULL,
  joined_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
  UNIQUE(group_id, user_id)
)";

const CREATE_EXPENSE_TABLE: &str = "CREATE TABLE IF NOT EXISTS expense (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  group_id INTEGER NOT NULL,
  amount REAL NOT NULL CHECK (amount > 0),
  description TEXT NOT NULL,
  created_at DATETIME NOT NULL,
  creator_id INTEGER NOT NULL,
  attachment TEXT
)";

const CREATE_EXPENSE_PARTICIPANT_TABLE: &str = "CREATE TABLE IF NOT EXISTS expense_participant (
  expense_id INTEGER NOT NULL REFERENCES expense(id) ON DELETE CASCADE,
  position INTEGER NOT NULL,
  user_id INTEGER NOT NULL,
  UNIQUE(expense_id, user_id)
)";

const CREATE_DEBT_TABLE: &str = "CREATE TABLE IF NOT EXISTS debt (
  user_id INTEGER NOT NULL,
  expense_id INTEGER NOT NULL REFERENCES expense(id) ON DELETE CASCADE,
  amount REAL NOT NULL CHECK (amount >= 0),
  status TEXT NOT NULL DEFAULT 'unpaid',
  PRIMARY KEY(user_id, expense_id)
)";

const CREATE_TRANSFER_TABLE: &str = "CREATE TABLE IF NOT EXISTS transfer (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  group_id INTEGER NOT NULL,
  sender_id INTEGER NOT NULL,
  receiver_id INTEGER NOT NULL,
  amount REAL NOT NULL CHECK (amount > 0),
  created_at DATETIME NOT NULL,
  status TEXT NOT NULL DEFAULT 'pending'
)";

const CREATE_GROUP_RULES_TABLE: &str = "CREATE TABLE IF NOT EXISTS group_rules (
  group_id INTEGER PRIMARY KEY,
  description TEXT NOT NULL,
  deadline_hours INTEGER NOT NULL CHECK (deadline_hours > 0),
  notification_time TEXT NOT NULL
)";

pub fn create_all_tables(connection: &rusqlite::Connection) -> anyhow::Result<()> {
    connection.pragma_update(None, "foreign_keys", "ON")?;
    connection.execute(CREATE_USER_TABLE, ())?;
    connection.execute(CREATE_GROUP_TABLE, ())?;
    connection.execute(CREATE_GROUP_MEMBER_TABLE, ())?;
    connection.execute(CREATE_EXPENSE_TABLE, ())?;
    connection.execute(CREATE_EXPENSE_PARTICIPANT_TABLE, ())?;
    connection.execute(CREATE_DEBT_TABLE, ())?;
    connection.execute(CREATE_TRANSFER_TABLE, ())?;
    connection.execute(CREATE_GROUP_RULES_TABLE, ())?;
    Ok(())
}
