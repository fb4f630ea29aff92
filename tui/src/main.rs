mod app;
mod errors;
mod widgets;

use app::App;
use client::Client;

#[tokio::main]
async fn main() -> app::AppResult<()> {
    env_logger::init();

    let client = Client::new().await?;

    let mut terminal = ratatui::init();
    let mut app = App::new(client);
    let result = app.run(&mut terminal).await;
    ratatui::restore();

    result
}
