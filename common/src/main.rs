use rand::prelude::IndexedRandom;
use sapper::{Board, CellContent, Coord, Engine, RegionType};

fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    let mines = [
        Coord::new(1, 1),
        Coord::new(4, 0),
        Coord::new(6, 2),
        Coord::new(2, 5),
        Coord::new(5, 5),
        Coord::new(7, 6),
        Coord::new(0, 7),
        Coord::new(3, 7),
    ];
    let board = Board::with_mines(8, 8, &mines)?;
    let mut engine = Engine::new(board);
    let mut rng = rand::rng();

    println!("--- Autonomous Sapper Bot ---");
    println!("Strategy: resolve every provably forced cell, guess otherwise.");
    engine.reveal(Coord::new(0, 0))?;
    print_board(&engine);

    // --- 2. Deduction Loop ---
    let mut move_count = 0;
    loop {
        if engine.board().hidden_cells().is_empty() {
            println!("\nResult: the bot cleared the board.");
            break;
        }
        move_count += 1;
        println!("\n--- Move #{move_count} ---");

        // --- 3. Run the rule engine, then ask the oracle ---
        engine.generate_and_apply_to_fixpoint()?;
        let forced = engine.forced_cells()?;

        if !forced.is_empty() {
            println!("Logic forced {} cells.", forced.len());
            for c in forced.iter() {
                if engine.board().is_mined(c) {
                    engine.flag(c)?;
                } else {
                    engine.reveal(c)?;
                }
            }
        } else if engine.board().hidden_cells().is_empty() {
            continue;
        } else {
            // --- 4. No forced move: guess ---
            println!("No forced move. Guessing...");
            let hidden: Vec<Coord> = engine.board().hidden_cells().iter().collect();
            let Some(&pick) = hidden.choose(&mut rng) else {
                continue;
            };
            println!("Bot reveals {pick}...");
            if !engine.reveal(pick)? {
                print_board(&engine);
                println!("\nResult: the bot guessed into a mine and lost.");
                break;
            }
        }

        print_board(&engine);
    }

    let regions = engine.list_regions();
    println!("\n{} regions were still active at the end.", regions.len());
    Ok(())
}

fn print_board(engine: &Engine) {
    let board = engine.board();
    print!("   ");
    for x in 0..board.width() {
        print!("{x:^3}");
    }
    println!("\n  +{}", "---".repeat(board.width() as usize));

    for y in 0..board.height() {
        print!("{y:^2}|");
        for x in 0..board.width() {
            let c = Coord::new(x, y);
            let display = if board.is_hidden(c) {
                " \u{25a0} ".to_string()
            } else if board.flags().contains(c) {
                " F ".to_string()
            } else {
                match board.cell(c) {
                    CellContent::Clue(RegionType::Equal(v)) => format!(" {v} "),
                    CellContent::Clue(_) => " ? ".to_string(),
                    CellContent::Mine => " * ".to_string(),
                }
            };
            print!("{display}");
        }
        println!();
    }
}
