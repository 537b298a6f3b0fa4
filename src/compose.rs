//! Renders matched changes into chat messages.
//!
//! Everything here is pure: callers hand in the destination group and the
//! already-resolved names.

use crate::matcher::WatchGroup;
use crate::model::{Category, FeedRecord, Game, NewMessage};

/// Transport limit for one chat message.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Escape characters that chat markdown would interpret.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '*' | '_' | '~' | '`' | '|' | '>') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// "1 new trade", "3 new trades".
fn new_items_label(count: usize, category: Category) -> String {
    format!("{} new {}", count, category.noun(count))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameChangeKind {
    /// The game picked up a score (or was first seen with one).
    Final,
    /// A previously scored game changed; holds the old `(visitor, home)` score.
    Corrected { visitor: i32, home: i32 },
}

/// A game that should be announced, with display names already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEvent {
    pub game: Game,
    pub visitor_name: String,
    pub home_name: String,
    pub kind: GameChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Win,
    Loss,
    Tie,
}

/// Team whose point of view the message takes: the group's own team if it
/// played, otherwise the higher scorer, otherwise the home team.
pub fn perspective_team(group: &WatchGroup, game: &Game) -> i64 {
    let played = [game.home_team_id, game.visitor_team_id];
    if let Some(team) = group.teams_in(&played).next() {
        return team;
    }
    match (game.visitor_score, game.home_score) {
        (Some(v), Some(h)) if v > h => game.visitor_team_id,
        _ => game.home_team_id,
    }
}

pub fn compose_game(group: &WatchGroup, league_name: &str, event: &GameEvent) -> NewMessage {
    let game = &event.game;
    let me = perspective_team(group, game);
    let (my_name, their_name, my_score, their_score) = if me == game.visitor_team_id {
        (
            &event.visitor_name,
            &event.home_name,
            game.visitor_score,
            game.home_score,
        )
    } else {
        (
            &event.home_name,
            &event.visitor_name,
            game.home_score,
            game.visitor_score,
        )
    };
    let my_name = escape_markdown(my_name);
    let their_name = escape_markdown(their_name);

    let body = match (my_score, their_score) {
        (Some(mine), Some(theirs)) => {
            let outcome = match mine.cmp(&theirs) {
                std::cmp::Ordering::Greater => Outcome::Win,
                std::cmp::Ordering::Less => Outcome::Loss,
                std::cmp::Ordering::Equal => Outcome::Tie,
            };
            let verb = match outcome {
                Outcome::Win => "defeated",
                Outcome::Loss => "lost to",
                Outcome::Tie => "tied",
            };
            let qualifier = if game.shootout {
                " (SO)"
            } else if game.overtime {
                " (OT)"
            } else {
                ""
            };
            format!("**{my_name}** {verb} **{their_name}** {mine}-{theirs}{qualifier}")
        }
        _ => format!("**{my_name}** vs **{their_name}**: no final score yet"),
    };

    let content = match event.kind {
        GameChangeKind::Final => body,
        GameChangeKind::Corrected { visitor, home } => {
            let (was_mine, was_theirs) = if me == game.visitor_team_id {
                (visitor, home)
            } else {
                (home, visitor)
            };
            format!("Score correction: {body} (was {was_mine}-{was_theirs})")
        }
    };

    NewMessage {
        guild_id: group.guild_id,
        channel_id: group.channel_id,
        title: format!("{} result", escape_markdown(league_name)),
        content,
    }
}

/// Announce newly seen feed records. Returns one message per chunk so long
/// feeds never exceed [`MAX_MESSAGE_LEN`].
pub fn compose_feed(
    group: &WatchGroup,
    league_name: &str,
    category: Category,
    records: &[FeedRecord],
) -> Vec<NewMessage> {
    let title = format!(
        "{}: {}",
        escape_markdown(league_name),
        new_items_label(records.len(), category)
    );
    let lines: Vec<String> = records
        .iter()
        .map(|r| format!("- {}", escape_markdown(r.summary.trim())))
        .collect();

    chunk_lines(&lines, MAX_MESSAGE_LEN)
        .into_iter()
        .map(|content| NewMessage {
            guild_id: group.guild_id,
            channel_id: group.channel_id,
            title: title.clone(),
            content,
        })
        .collect()
}

/// Pack whole lines into chunks of at most `max_len` characters. A single
/// line longer than `max_len` gets a chunk of its own.
pub fn chunk_lines(lines: &[String], max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in lines {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if !current.is_empty() && current_len + needed > max_len {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Render a box-bordered table inside code fences, split into messages of at
/// most `max_len` characters. Every chunk repeats the header; rows are never
/// split across chunks.
pub fn render_table(headers: &[&str], rows: &[Vec<String>], max_len: usize) -> Vec<String> {
    let columns = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().take(columns).enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let border = |left: char, mid: char, right: char| {
        let mut line = String::new();
        line.push(left);
        for (i, w) in widths.iter().enumerate() {
            line.push_str(&"─".repeat(w + 2));
            line.push(if i + 1 == columns { right } else { mid });
        }
        line
    };
    let render_row = |cells: &[String]| {
        let mut line = String::from("│");
        for (i, w) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let pad = w - cell.chars().count();
            line.push(' ');
            line.push_str(cell);
            line.push_str(&" ".repeat(pad + 1));
            line.push('│');
        }
        line
    };

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let head = format!(
        "```\n{}\n{}\n{}\n",
        border('┌', '┬', '┐'),
        render_row(&header_cells),
        border('├', '┼', '┤')
    );
    let foot = format!("{}\n```", border('└', '┴', '┘'));
    let overhead = head.chars().count() + foot.chars().count();

    let mut chunks = Vec::new();
    let mut body = String::new();
    let mut body_len = 0;
    for row in rows {
        let line = format!("{}\n", render_row(row));
        let line_len = line.chars().count();
        if body_len > 0 && overhead + body_len + line_len > max_len {
            chunks.push(format!("{head}{body}{foot}"));
            body.clear();
            body_len = 0;
        }
        body.push_str(&line);
        body_len += line_len;
    }
    if body_len > 0 || chunks.is_empty() {
        chunks.push(format!("{head}{body}{foot}"));
    }
    chunks
}
