//! TUI 应用主循环
//!
//! 进入全屏/原始模式，每帧读取最新 SessionSnapshot、消费 Notice、轮询键盘，
//! 把用户操作转为 SessionHandle 上的意图，并用 draw 渲染。

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::broadcast::error::TryRecvError;

use crate::core::{Notice, RecoveryChoice, RecoveryPrompt, SessionHandle, SessionSnapshot};
use crate::ui::event::{map_key, Action, EventHandler, Focus};
use crate::ui::render::draw;

/// 短提示的显示时长
const TOAST_TTL: Duration = Duration::from_secs(3);

/// 纯界面状态（不属于会话）
#[derive(Debug)]
pub struct App {
    pub focus: Focus,
    /// 设备列表中高亮的行（针对过滤后的列表）
    pub device_index: usize,
    pub input: String,
    pub toast: Option<(String, Instant)>,
    pub prompt: Option<RecoveryPrompt>,
    pub filter_devices: bool,
}

impl App {
    pub fn new(filter_devices: bool) -> Self {
        Self {
            focus: Focus::Devices,
            device_index: 0,
            input: String::new(),
            toast: None,
            prompt: None,
            filter_devices,
        }
    }

    pub fn on_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Toast(text) => self.toast = Some((text, Instant::now())),
            Notice::DevicesFound(n) => {
                self.toast = Some((format!("{n} peer device(s) found!"), Instant::now()))
            }
            Notice::Prompt(prompt) => self.prompt = Some(prompt),
        }
    }

    /// 当前可显示的提示文本（过期后清除）
    pub fn active_toast(&mut self) -> Option<&str> {
        if self
            .toast
            .as_ref()
            .is_some_and(|(_, at)| at.elapsed() > TOAST_TTL)
        {
            self.toast = None;
        }
        self.toast.as_ref().map(|(text, _)| text.as_str())
    }

    /// 输入框是否可用：已连接的客户端且没有发送进行中
    pub fn can_send(snapshot: &SessionSnapshot) -> bool {
        snapshot.is_connected() && !snapshot.is_group_owner() && !snapshot.sending_message
    }

    /// 处理一个 Action；返回 false 表示退出
    pub fn handle(&mut self, action: Action, snapshot: &SessionSnapshot, session: &SessionHandle) -> bool {
        let visible = snapshot.visible_devices(self.filter_devices);
        let result = match action {
            Action::Quit => return false,
            Action::ToggleDiscovery => {
                if snapshot.discovering {
                    session.stop_discovery()
                } else {
                    session.start_discovery()
                }
            }
            Action::FetchMessages => session.fetch_messages(),
            Action::ClearLog => session.clear_log(),
            Action::CreateGroup => session.create_group(),
            Action::Connect => session.connect(),
            Action::Disconnect => session.disconnect(),
            Action::FocusNext => {
                self.focus = match self.focus {
                    Focus::Devices => Focus::Input,
                    Focus::Input => Focus::Devices,
                };
                Ok(())
            }
            Action::MoveUp => {
                self.device_index = self.device_index.saturating_sub(1);
                Ok(())
            }
            Action::MoveDown => {
                self.device_index = (self.device_index + 1).min(visible.len().saturating_sub(1));
                Ok(())
            }
            Action::Select => match visible.get(self.device_index) {
                Some(device) => session.select_device(device.address.clone()),
                None => Ok(()),
            },
            Action::Input(c) => {
                if Self::can_send(snapshot) {
                    self.input.push(c);
                }
                Ok(())
            }
            Action::Backspace => {
                self.input.pop();
                Ok(())
            }
            Action::Submit => {
                if Self::can_send(snapshot) && !self.input.trim().is_empty() {
                    let text = std::mem::take(&mut self.input);
                    session.send_message(text)
                } else {
                    Ok(())
                }
            }
            Action::Choose(i) => match self.prompt.take() {
                Some(prompt) => {
                    let choice = prompt.choices.get(i).copied().unwrap_or(RecoveryChoice::Dismiss);
                    session.resolve(choice)
                }
                None => Ok(()),
            },
            Action::Dismiss => {
                self.prompt = None;
                Ok(())
            }
            Action::Ignore => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("Could not dispatch intent: {}", e);
            return false;
        }
        true
    }
}

/// 离开作用域时恢复终端（包括主循环被关闭信号中断的情况）
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = restore_terminal(&mut self.terminal) {
            tracing::warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// 运行 TUI：启用原始模式与全屏，循环 poll 事件 + 渲染，退出时恢复终端
pub async fn run_app(session: &SessionHandle, filter_devices: bool) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut guard = TerminalGuard {
        terminal: Terminal::new(backend)?,
    };

    event_loop(&mut guard.terminal, session, filter_devices).await
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    session: &SessionHandle,
    filter_devices: bool,
) -> anyhow::Result<()> {
    let events = EventHandler::default();
    let mut notices = session.notices();
    let mut app = App::new(filter_devices);

    loop {
        loop {
            match notices.try_recv() {
                Ok(notice) => app.on_notice(notice),
                Err(TryRecvError::Lagged(n)) => tracing::debug!("UI skipped {} notices", n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let snapshot = session.snapshot();
        terminal.draw(|f| draw(f, &mut app, &snapshot))?;

        if let Some(key) = events.poll()? {
            let action = map_key(key, app.focus, app.prompt.is_some());
            if !app.handle(action, &snapshot, session) {
                break;
            }
        }

        tokio::task::yield_now().await;
    }
    Ok(())
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}
