//! Terminal dashboard for the task queue, refreshed every two seconds.
//!
//! Tabs:
//! Overview (task counts per status)
//! Queue (next 5 pending tasks and broker depth)
//! Results (recently finished tasks)

use std::{
  collections::BTreeMap,
  io,
  sync::mpsc,
  time::{Duration, Instant},
};

use anyhow::Result;
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use lapin::Channel;
use tokio::runtime::Runtime;
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
  Terminal,
};

use taskqueue::collaborators::TaskRepository;
use taskqueue::config::Config;
use taskqueue::database::setup_database;
use taskqueue::encoding::{RESULT_TOPIC, TASK_QUEUE};
use taskqueue::messaging::{create_rabbit_channel, queue_depth};
use taskqueue::models::{Task, TaskStatus};
use taskqueue::storage::PgTaskRepository;

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);
const RECENT_RESULTS: i64 = 20;

struct TaskInfo {
  id: String,
  task_type: String,
  status: TaskStatus,
  updated_at: String,
}

impl From<&Task> for TaskInfo {
  fn from(task: &Task) -> Self {
    Self {
      id: task.id.clone(),
      task_type: task.task_type.clone(),
      status: task.status,
      updated_at: task.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum DashboardTab {
  Overview,
  Queue,
  Results,
}

#[derive(Default)]
struct Snapshot {
  counts: BTreeMap<TaskStatus, i64>,
  queued_tasks: Vec<TaskInfo>,
  finished_tasks: Vec<TaskInfo>,
  task_queue_depth: u32,
  result_queue_depth: u32,
}

struct App {
  current_tab: DashboardTab,
  snapshot: Snapshot,
  last_error: Option<String>,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Overview,
      snapshot: Snapshot::default(),
      last_error: None,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Queue,
      DashboardTab::Queue => DashboardTab::Results,
      DashboardTab::Results => DashboardTab::Overview,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Results,
      DashboardTab::Queue => DashboardTab::Overview,
      DashboardTab::Results => DashboardTab::Queue,
    }
  }

  /// Keeps the last good snapshot when a refresh fails.
  fn apply(&mut self, refreshed: Result<Snapshot>) {
    match refreshed {
      Ok(snapshot) => {
        self.snapshot = snapshot;
        self.last_error = None;
      }
      Err(e) => self.last_error = Some(format!("{:#}", e)),
    }
  }

  fn total_tasks(&self) -> i64 {
    self.snapshot.counts.values().sum()
  }
}

async fn fetch_snapshot(repo: &PgTaskRepository, channel: &Channel) -> Result<Snapshot> {
  let counts = repo.count_by_status().await?;
  let queued_tasks = repo.list_pending(5).await?.iter().map(TaskInfo::from).collect();
  let finished_tasks = repo
    .list_finished(RECENT_RESULTS)
    .await?
    .iter()
    .map(TaskInfo::from)
    .collect();

  Ok(Snapshot {
    counts,
    queued_tasks,
    finished_tasks,
    task_queue_depth: queue_depth(channel, TASK_QUEUE).await.unwrap_or(0),
    result_queue_depth: queue_depth(channel, RESULT_TOPIC).await.unwrap_or(0),
  })
}

fn main() -> Result<()> {
  let config = Config::from_env()?;
  let rt = Runtime::new()?;
  let db_pool = rt.block_on(setup_database(&config.database_url, config.db_max_connections))?;
  let rabbit_channel = rt.block_on(create_rabbit_channel(&config.rabbitmq_url))?;
  let repo = PgTaskRepository::new(db_pool);

  let (tx, rx) = mpsc::channel::<Result<Snapshot>>();
  rt.spawn(async move {
    loop {
      let refreshed = fetch_snapshot(&repo, &rabbit_channel).await;
      if tx.send(refreshed).is_err() {
        break;
      }
      tokio::time::sleep(REFRESH_INTERVAL).await;
    }
  });

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let outcome = run_app(&mut terminal, &rx);

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  outcome
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, rx: &mpsc::Receiver<Result<Snapshot>>) -> Result<()> {
  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    while let Ok(refreshed) = rx.try_recv() {
      app.apply(refreshed);
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => return Ok(()),
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let tab_titles = ["Overview", "Queue", "Results"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Task Queue"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Overview => 0,
      DashboardTab::Queue => 1,
      DashboardTab::Results => 2,
    });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Overview => render_overview(f, app, chunks[1]),
    DashboardTab::Queue => render_queue(f, app, chunks[1]),
    DashboardTab::Results => render_results(f, app, chunks[1]),
  }

  let footer_text = match &app.last_error {
    Some(e) => format!("Refresh failed: {} | q: Quit", e),
    None => "←/→: Switch Tabs | q: Quit".to_string(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(if app.last_error.is_some() { Color::Red } else { Color::White }))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn status_color(status: TaskStatus) -> Color {
  match status {
    TaskStatus::Pending => Color::Yellow,
    TaskStatus::Processing => Color::Cyan,
    TaskStatus::Completed => Color::Green,
    TaskStatus::Failed => Color::Red,
  }
}

fn render_overview<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
    .split(area);

  let count_items: Vec<ListItem> = app.snapshot.counts.iter().map(|(status, count)| {
    ListItem::new(Spans::from(vec![
      Span::styled(format!("{:<12}", status), Style::default().fg(status_color(*status)).add_modifier(Modifier::BOLD)),
      Span::raw(count.to_string()),
    ]))
  }).collect();
  let counts_list = List::new(count_items)
    .block(Block::default().borders(Borders::ALL).title(format!("Tasks by Status ({} total)", app.total_tasks())));
  f.render_widget(counts_list, chunks[0]);

  let broker = vec![
    ListItem::new(Spans::from(Span::raw(format!("{}: {} waiting", TASK_QUEUE, app.snapshot.task_queue_depth)))),
    ListItem::new(Spans::from(Span::raw(format!("{}: {} waiting", RESULT_TOPIC, app.snapshot.result_queue_depth)))),
  ];
  let broker_list = List::new(broker)
    .block(Block::default().borders(Borders::ALL).title("Broker Queues"));
  f.render_widget(broker_list, chunks[1]);
}

fn render_queue<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let task_items: Vec<ListItem> = app.snapshot.queued_tasks.iter().map(|t| {
    ListItem::new(Spans::from(vec![
      Span::styled(format!("{} ", t.id), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
      Span::raw(format!("Type: {} | Status: {} | Since: {}", t.task_type, t.status, t.updated_at))
    ]))
  }).collect();
  let header = format!(
    "Next 5 Pending Tasks ({}: {} | {}: {})",
    TASK_QUEUE, app.snapshot.task_queue_depth, RESULT_TOPIC, app.snapshot.result_queue_depth
  );
  let tasks_list = List::new(task_items)
    .block(Block::default().borders(Borders::ALL).title(header));
  f.render_widget(tasks_list, area);
}

fn render_results<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let result_items: Vec<ListItem> = app.snapshot.finished_tasks.iter().map(|t| {
    ListItem::new(Spans::from(vec![
      Span::styled(t.updated_at.clone(), Style::default().fg(Color::Green)),
      Span::raw(" - "),
      Span::styled(t.status.to_string(), Style::default().fg(status_color(t.status))),
      Span::raw(format!(" {} ({})", t.id, t.task_type)),
    ]))
  }).collect();
  let results_list = List::new(result_items)
    .block(Block::default().borders(Borders::ALL).title("Recently Finished"));
  f.render_widget(results_list, area);
}
