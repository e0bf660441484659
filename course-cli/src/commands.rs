use std::path::PathBuf;

use clap::{Parser, Subcommand};
use course_core::{
    refresh_catalog, CatalogClient, ClientError, Course, CourseCache, CourseId, Session,
    SessionError,
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "coursebook", version, about = "Browse, bookmark and enroll in courses")]
pub struct Cli {
    /// Directory holding the course snapshot and credentials.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// List the catalog, fetching it when the cache is empty.
    Catalog {
        #[arg(long)]
        refresh: bool,
        #[arg(long, short)]
        search: Option<String>,
    },
    Show { id: CourseId },
    /// Flip the bookmark on a course.
    Bookmark { id: CourseId },
    Bookmarks,
    Enroll { id: CourseId },
    MyCourses,
    Profile,
    Login { username: String, password: String },
    Register {
        email: String,
        username: String,
        password: String,
    },
    Logout,
    /// Point the profile avatar at a local image.
    Avatar { uri: String },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("course {0} not found; run `coursebook catalog --refresh`")]
    NotFound(CourseId),
    #[error("not logged in")]
    NotLoggedIn,
}

pub struct Context {
    pub client: CatalogClient,
    pub cache: CourseCache,
    pub session: Session,
}

pub async fn run(ctx: &mut Context, command: Command) -> Result<(), CommandError> {
    match command {
        Command::Catalog { refresh, search } => {
            if refresh || ctx.cache.courses().is_empty() {
                let count = refresh_catalog(&ctx.client, &mut ctx.cache).await?;
                info!(count, "catalog refreshed");
            }
            let query = search.unwrap_or_default();
            print_courses(&ctx.cache, ctx.cache.search(&query));
        }
        Command::Show { id } => {
            let course = ctx.cache.course_by_id(id).ok_or(CommandError::NotFound(id))?;
            println!("{}", course_line(course, ctx.cache.is_enrolled(id)));
            println!("    by {} ({})", course.instructor.name, course.instructor.avatar_url);
            println!("    {}", course.description);
        }
        Command::Bookmark { id } => {
            ensure_known(&ctx.cache, id)?;
            ctx.cache.toggle_bookmark(id);
            let state = if ctx.cache.is_bookmarked(id) { "bookmarked" } else { "removed bookmark" };
            println!("{state}: {id}");
        }
        Command::Bookmarks => print_courses(&ctx.cache, ctx.cache.bookmarked_courses()),
        Command::Enroll { id } => {
            ensure_known(&ctx.cache, id)?;
            if ctx.cache.is_enrolled(id) {
                println!("already enrolled in {id}");
            } else {
                ctx.cache.enroll_course(id);
                println!("enrolled in {id}");
            }
        }
        Command::MyCourses => print_courses(&ctx.cache, ctx.cache.enrolled_courses()),
        Command::Profile => {
            let user = ctx.session.user().ok_or(CommandError::NotLoggedIn)?;
            let stats = ctx.cache.stats();
            println!("{} <{}>", user.full_name.as_deref().unwrap_or(&user.username), user.email);
            if let Some(avatar) = &user.avatar {
                println!("avatar: {}", avatar.url);
            }
            println!("enrolled: {}  bookmarks: {}", stats.enrolled, stats.bookmarks);
        }
        Command::Login { username, password } => {
            let login = ctx.client.login(&username, &password).await?;
            ctx.session.login(login.user, login.access_token).await?;
            println!("logged in as {username}");
        }
        Command::Register {
            email,
            username,
            password,
        } => {
            ctx.client.register(&email, &username, &password).await?;
            println!("account created, you can now log in");
        }
        Command::Logout => {
            ctx.session.logout().await?;
            println!("logged out");
        }
        Command::Avatar { uri } => {
            if !ctx.session.is_authenticated() {
                return Err(CommandError::NotLoggedIn);
            }
            ctx.session.update_profile_image(&uri).await?;
            println!("avatar updated");
        }
    }

    if let Some(failure) = ctx.cache.last_persist_error() {
        warn!(message = %failure.message, "course state may not have been saved");
    }
    Ok(())
}

fn ensure_known(cache: &CourseCache, id: CourseId) -> Result<(), CommandError> {
    match cache.course_by_id(id) {
        Some(_) => Ok(()),
        None => Err(CommandError::NotFound(id)),
    }
}

fn print_courses(cache: &CourseCache, courses: Vec<&Course>) {
    if courses.is_empty() {
        println!("no courses");
        return;
    }
    for course in courses {
        println!("{}", course_line(course, cache.is_enrolled(course.id)));
    }
}

fn course_line(course: &Course, enrolled: bool) -> String {
    let mark = if course.is_bookmarked { '*' } else { ' ' };
    let enrolled = if enrolled { " [enrolled]" } else { "" };
    format!(
        "{mark} {:>4}  {:<40} ${:>8.2}  {}{enrolled}",
        course.id, course.title, course.price, course.instructor.name
    )
}
